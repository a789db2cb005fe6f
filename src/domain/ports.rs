//! Domain Ports - Boundaries between the harness and the outside world
//!
//! Scenarios and orchestrators only talk to the cluster and to the storage
//! backend through these traits. `KubeCluster` and `BlobContainerProbe` are
//! the live adapters; the unit tests' in-memory cluster implements both.
//! External shell helpers sit behind `HelperScripts`.

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Event, Namespace, PersistentVolume, PersistentVolumeClaim, Pod,
};
use k8s_openapi::api::storage::v1::StorageClass;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Exec
// =============================================================================

/// Result of running a command inside a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Whether the command exited zero
    pub success: bool,
}

// =============================================================================
// Cluster Port
// =============================================================================

/// Port for the cluster control-plane API
///
/// Deletes succeed when the object is already gone; gets return `None`
/// instead of a not-found error.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create a namespace from a generateName prefix
    async fn create_namespace(&self, generate_name: &str) -> Result<Namespace>;

    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn create_storage_class(&self, storage_class: &StorageClass) -> Result<StorageClass>;

    async fn delete_storage_class(&self, name: &str) -> Result<()>;

    async fn create_persistent_volume(&self, pv: &PersistentVolume) -> Result<PersistentVolume>;

    async fn get_persistent_volume(&self, name: &str) -> Result<Option<PersistentVolume>>;

    async fn delete_persistent_volume(&self, name: &str) -> Result<()>;

    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim>;

    async fn get_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>>;

    /// Request a new storage size for a claim
    async fn resize_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
        size: &str,
    ) -> Result<PersistentVolumeClaim>;

    async fn delete_persistent_volume_claim(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String>;

    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> Result<ExecOutput>;

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment)
        -> Result<Deployment>;

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()>;

    /// Events whose involved object has the given name
    async fn list_events(&self, namespace: &str, involved_object: &str) -> Result<Vec<Event>>;
}

// =============================================================================
// Backend Port
// =============================================================================

/// Port for checking the storage backend directly, bypassing the cluster
#[async_trait]
pub trait BackendVolumeProbe: Send + Sync {
    /// Whether the backend volume behind a CSI volume handle exists
    async fn volume_exists(&self, volume_id: &str) -> Result<bool>;

    /// Remove a backend volume the cluster left behind
    async fn delete_volume(&self, volume_id: &str) -> Result<()>;

    fn backend_name(&self) -> &str;
}

// =============================================================================
// Helper Script Port
// =============================================================================

/// Port for the shell helpers shipped with the driver repository
#[async_trait]
pub trait HelperScripts: Send + Sync {
    /// Fail if any driver pod restarted unexpectedly
    async fn check_driver_pods_restart(&self) -> Result<()>;

    /// Name of the secret holding the storage account key
    async fn storage_account_secret_name(&self) -> Result<String>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterApiRef = Arc<dyn ClusterApi>;
pub type BackendVolumeProbeRef = Arc<dyn BackendVolumeProbe>;
pub type HelperScriptsRef = Arc<dyn HelperScripts>;
