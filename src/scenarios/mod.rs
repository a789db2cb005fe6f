//! Scenario Drivers
//!
//! One type per tested behavior. A driver holds its fixed inputs (pod and
//! volume descriptions, StorageClass parameters, expected output), runs
//! the matching setup orchestrator and asserts on what the cluster
//! reports. Every resource it creates lands on the `CleanupStack` the
//! runner hands in, so teardown happens however the run ends.
//!
//! `catalog` assembles the drivers into the suites the binary runs.

pub mod catalog;
pub mod dynamic;
pub mod static_volumes;

pub use dynamic::*;
pub use static_volumes::*;

use crate::error::Result;
use crate::resources::{CleanupStack, TestContext, TestPersistentVolumeClaim, TestPod};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// A runnable end-to-end scenario
#[async_trait]
pub trait Scenario: Send + Sync {
    /// Human readable name, used for selection and reports
    fn name(&self) -> &str;

    /// Run against the scenario's own namespace in `ctx`
    async fn run(&self, ctx: &TestContext, cleanup: &mut CleanupStack) -> Result<()>;
}

pub type ScenarioRef = Arc<dyn Scenario>;

/// Command to exec in a running pod and the exact stdout it must produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodExecCheck {
    pub cmd: Vec<String>,
    pub expected: String,
}

impl PodExecCheck {
    pub fn new<I, S>(cmd: I, expected: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            expected: expected.into(),
        }
    }
}

/// Create the pod and register its deletion
pub(crate) async fn start_pod(pod: &mut TestPod, cleanup: &mut CleanupStack) -> Result<()> {
    info!("Deploying the pod");
    pod.create().await?;
    cleanup.push(pod.cleanup_action()?);
    Ok(())
}

/// Claims whose class defers binding get bound by the pod that consumes
/// them; wait for that and validate them now
pub(crate) async fn bind_deferred_claims(claims: &mut [TestPersistentVolumeClaim]) -> Result<()> {
    for claim in claims.iter_mut().filter(|c| c.persistent_volume().is_none()) {
        claim.wait_for_bound().await?;
        claim.validate_provisioned_persistent_volume()?;
    }
    Ok(())
}
