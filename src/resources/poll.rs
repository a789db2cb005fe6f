//! Bounded polling of eventually-consistent cluster state

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Outcome of a single poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// Condition reached
    Ready(T),
    /// Not yet; carries the observed state for the timeout message
    Pending(String),
}

/// Poll until the probe is ready. A probe error aborts immediately; running
/// out of time yields `Error::Timeout` with the last observed state.
pub async fn poll_until<T, F, Fut>(
    condition: &str,
    interval: Duration,
    timeout: Duration,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>>>,
{
    let start = Instant::now();
    let mut last_observed = String::from("nothing observed");

    loop {
        match probe().await? {
            Probe::Ready(value) => return Ok(value),
            Probe::Pending(observed) => {
                debug!("Waiting for {}: {}", condition, observed);
                last_observed = observed;
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(Error::Timeout {
                condition: condition.to_string(),
                timeout,
                last_observed,
            });
        }
        sleep(interval.min(timeout - elapsed)).await;
    }
}
