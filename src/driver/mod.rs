//! Test Drivers
//!
//! A test driver turns scenario parameters into the cluster objects a CSI
//! plugin expects: StorageClasses for dynamic provisioning and
//! PersistentVolumes for pre-provisioned volumes.

pub mod blob;

pub use blob::*;

use crate::domain::specs::{ReclaimPolicy, VolumeBindingMode};
use k8s_openapi::api::core::v1::PersistentVolume;
use k8s_openapi::api::storage::v1::StorageClass;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Driver able to describe a StorageClass for dynamic provisioning
pub trait DynamicPvTestDriver: Send + Sync {
    fn get_provision_storage_class(
        &self,
        parameters: &BTreeMap<String, String>,
        mount_options: &[String],
        reclaim_policy: Option<ReclaimPolicy>,
        binding_mode: Option<VolumeBindingMode>,
        allowed_topology_values: &[String],
        namespace: &str,
    ) -> StorageClass;
}

/// Driver able to describe a PersistentVolume for an existing backend volume
pub trait PreProvisionedVolumeTestDriver: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn get_persistent_volume(
        &self,
        volume_id: &str,
        fs_type: Option<&str>,
        size: &str,
        reclaim_policy: Option<ReclaimPolicy>,
        namespace: &str,
        attributes: &BTreeMap<String, String>,
        node_stage_secret_ref: Option<&str>,
    ) -> PersistentVolume;
}

/// Replace characters that are not legal in generated object names
pub fn normalize_provisioner(provisioner: &str) -> String {
    provisioner.replace('/', "-")
}

pub type DynamicPvTestDriverRef = Arc<dyn DynamicPvTestDriver>;
pub type PreProvisionedVolumeTestDriverRef = Arc<dyn PreProvisionedVolumeTestDriver>;
