//! Resource Wrappers
//!
//! Thin stateful handles around single cluster objects. Each wrapper knows
//! how to create its object, wait for the condition that makes it usable,
//! and produce the `CleanupAction` that deletes it again.

pub mod claim;
pub mod cleanup;
pub mod deployment;
pub mod pod;
pub mod poll;
pub mod storage_class;

pub use claim::*;
pub use cleanup::*;
pub use deployment::*;
pub use pod::*;
pub use poll::*;
pub use storage_class::*;

use crate::config::HarnessConfig;
use crate::domain::ports::ClusterApiRef;
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Everything a wrapper needs to reach the cluster for one scenario
#[derive(Clone)]
pub struct TestContext {
    pub cluster: ClusterApiRef,
    /// Namespace owned by the running scenario
    pub namespace: String,
    pub config: Arc<HarnessConfig>,
}

impl TestContext {
    pub fn new(cluster: ClusterApiRef, namespace: impl Into<String>, config: Arc<HarnessConfig>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            config,
        }
    }

    /// Poll `probe` at the configured interval until it is ready or `timeout` passes
    pub async fn poll_until<T, F, Fut>(&self, condition: &str, timeout: Duration, probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>>>,
    {
        poll_until(condition, self.config.poll_interval(), timeout, probe).await
    }
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
