//! Deferred Teardown
//!
//! Every resource a scenario creates pushes one `CleanupAction` onto the
//! scenario's `CleanupStack` right after creation. The runner unwinds the
//! stack whether the scenario passed or failed, newest action first, so
//! pods go before claims and claims before storage classes.

use super::poll::{poll_until, Probe};
use crate::config::HarnessConfig;
use crate::domain::ports::ClusterApi;
use crate::domain::specs::ReclaimPolicy;
use crate::error::{Error, Result};
use tracing::{info, warn};

// =============================================================================
// Cleanup Action
// =============================================================================

/// Teardown of exactly one created resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAction {
    DeleteNamespace {
        name: String,
    },
    DeleteStorageClass {
        name: String,
    },
    /// Deletes the claim, then waits for its volume when the volume's
    /// reclaim policy is Delete
    DeletePersistentVolumeClaim {
        namespace: String,
        name: String,
    },
    DeletePersistentVolume {
        name: String,
    },
    DeletePod {
        namespace: String,
        name: String,
    },
    DeleteDeployment {
        namespace: String,
        name: String,
    },
}

impl CleanupAction {
    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            CleanupAction::DeleteNamespace { name } => format!("Namespace/{}", name),
            CleanupAction::DeleteStorageClass { name } => format!("StorageClass/{}", name),
            CleanupAction::DeletePersistentVolumeClaim { namespace, name } => {
                format!("PersistentVolumeClaim/{}/{}", namespace, name)
            }
            CleanupAction::DeletePersistentVolume { name } => {
                format!("PersistentVolume/{}", name)
            }
            CleanupAction::DeletePod { namespace, name } => format!("Pod/{}/{}", namespace, name),
            CleanupAction::DeleteDeployment { namespace, name } => {
                format!("Deployment/{}/{}", namespace, name)
            }
        }
    }

    /// Perform the teardown
    pub async fn run(&self, cluster: &dyn ClusterApi, config: &HarnessConfig) -> Result<()> {
        match self {
            CleanupAction::DeleteNamespace { name } => cluster.delete_namespace(name).await,
            CleanupAction::DeleteStorageClass { name } => cluster.delete_storage_class(name).await,
            CleanupAction::DeletePersistentVolumeClaim { namespace, name } => {
                delete_claim(cluster, config, namespace, name).await
            }
            CleanupAction::DeletePersistentVolume { name } => {
                cluster.delete_persistent_volume(name).await?;
                wait_for_volume_deleted(cluster, config, name).await
            }
            CleanupAction::DeletePod { namespace, name } => cluster.delete_pod(namespace, name).await,
            CleanupAction::DeleteDeployment { namespace, name } => {
                cluster.delete_deployment(namespace, name).await
            }
        }
    }
}

/// Delete a claim; when its bound volume has reclaim policy Delete, wait
/// until the volume is gone as well
pub(crate) async fn delete_claim(
    cluster: &dyn ClusterApi,
    config: &HarnessConfig,
    namespace: &str,
    name: &str,
) -> Result<()> {
    let volume_name = cluster
        .get_persistent_volume_claim(namespace, name)
        .await?
        .and_then(|pvc| pvc.spec)
        .and_then(|spec| spec.volume_name)
        .filter(|v| !v.is_empty());

    info!("Deleting PersistentVolumeClaim {}/{}", namespace, name);
    cluster.delete_persistent_volume_claim(namespace, name).await?;

    let Some(volume_name) = volume_name else {
        return Ok(());
    };
    let Some(pv) = cluster.get_persistent_volume(&volume_name).await? else {
        return Ok(());
    };
    let policy = pv
        .spec
        .and_then(|s| s.persistent_volume_reclaim_policy)
        .and_then(|p| ReclaimPolicy::from_k8s(&p));
    if policy == Some(ReclaimPolicy::Delete) {
        wait_for_volume_deleted(cluster, config, &volume_name).await?;
    }
    Ok(())
}

pub(crate) async fn wait_for_volume_deleted(
    cluster: &dyn ClusterApi,
    config: &HarnessConfig,
    name: &str,
) -> Result<()> {
    let condition = format!("PersistentVolume {} deleted", name);
    poll_until(
        &condition,
        config.poll_interval(),
        config.timeouts.volume_delete(),
        move || async move {
            Ok(match cluster.get_persistent_volume(name).await? {
                None => Probe::Ready(()),
                Some(pv) => Probe::Pending(
                    pv.status
                        .and_then(|s| s.phase)
                        .unwrap_or_else(|| "present".to_string()),
                ),
            })
        },
    )
    .await
}

// =============================================================================
// Cleanup Stack
// =============================================================================

/// Ordered list of teardown actions owned by one scenario
#[derive(Debug, Default)]
pub struct CleanupStack {
    actions: Vec<CleanupAction>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: CleanupAction) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions in registration order
    pub fn actions(&self) -> &[CleanupAction] {
        &self.actions
    }

    /// Run every action once, newest first. A failing action does not stop
    /// the ones registered before it. Returns how many actions ran.
    pub async fn unwind(self, cluster: &dyn ClusterApi, config: &HarnessConfig) -> Result<usize> {
        let total = self.actions.len();
        let mut failures = Vec::new();

        for action in self.actions.into_iter().rev() {
            info!("Cleaning up {}", action.describe());
            if let Err(e) = action.run(cluster, config).await {
                warn!("Cleanup of {} failed: {}", action.describe(), e);
                failures.push(format!("{}: {}", action.describe(), e));
            }
        }

        match failures.first() {
            None => Ok(total),
            Some(first) => Err(Error::CleanupFailed {
                failed: failures.len(),
                total,
                first: first.clone(),
            }),
        }
    }
}
