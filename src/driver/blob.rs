//! Azure Blob CSI test driver

use super::{normalize_provisioner, DynamicPvTestDriver, PreProvisionedVolumeTestDriver};
use crate::domain::specs::{AccessMode, ReclaimPolicy, VolumeBindingMode};
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, CSIVolumeSource, PersistentVolume, PersistentVolumeSpec,
    SecretReference, TopologySelectorLabelRequirement, TopologySelectorTerm,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Annotation recording which provisioner owns a volume
pub const PROVISIONED_BY_ANNOTATION: &str = "pv.kubernetes.io/provisioned-by";

/// Namespace node-stage secrets are looked up in
pub const SECRET_NAMESPACE: &str = "default";

/// Mount options handed to blobfuse for inline volumes
pub const INLINE_MOUNT_OPTIONS: &str = "-o allow_other --file-cache-timeout-in-seconds=120";

/// Test driver for `blob.csi.azure.com`
#[derive(Debug, Clone)]
pub struct BlobCsiDriver {
    driver_name: String,
    topology_key: String,
}

impl BlobCsiDriver {
    pub fn new(driver_name: impl Into<String>) -> Self {
        Self {
            driver_name: driver_name.into(),
            topology_key: "topology.kubernetes.io/zone".to_string(),
        }
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// CSI source for a volume declared directly in the pod spec
    pub fn inline_volume_source(
        &self,
        secret_name: &str,
        container_name: &str,
        read_only: bool,
    ) -> CSIVolumeSource {
        let mut attributes = BTreeMap::new();
        attributes.insert("secretName".to_string(), secret_name.to_string());
        attributes.insert("containerName".to_string(), container_name.to_string());
        attributes.insert("mountOptions".to_string(), INLINE_MOUNT_OPTIONS.to_string());

        CSIVolumeSource {
            driver: self.driver_name.clone(),
            read_only: Some(read_only),
            volume_attributes: Some(attributes),
            ..Default::default()
        }
    }

    fn allowed_topologies(&self, values: &[String]) -> Option<Vec<TopologySelectorTerm>> {
        if values.is_empty() {
            return None;
        }
        Some(vec![TopologySelectorTerm {
            match_label_expressions: Some(vec![TopologySelectorLabelRequirement {
                key: self.topology_key.clone(),
                values: values.to_vec(),
            }]),
        }])
    }
}

impl Default for BlobCsiDriver {
    fn default() -> Self {
        Self::new("blob.csi.azure.com")
    }
}

impl DynamicPvTestDriver for BlobCsiDriver {
    fn get_provision_storage_class(
        &self,
        parameters: &BTreeMap<String, String>,
        mount_options: &[String],
        reclaim_policy: Option<ReclaimPolicy>,
        binding_mode: Option<VolumeBindingMode>,
        allowed_topology_values: &[String],
        namespace: &str,
    ) -> StorageClass {
        let generate_name = format!(
            "{}-{}-dynamic-sc-",
            namespace,
            normalize_provisioner(&self.driver_name)
        );

        StorageClass {
            metadata: ObjectMeta {
                generate_name: Some(generate_name),
                ..Default::default()
            },
            provisioner: self.driver_name.clone(),
            parameters: Some(parameters.clone()),
            reclaim_policy: Some(reclaim_policy.unwrap_or(ReclaimPolicy::Delete).to_string()),
            volume_binding_mode: Some(binding_mode.unwrap_or_default().to_string()),
            mount_options: Some(mount_options.to_vec()),
            allowed_topologies: self.allowed_topologies(allowed_topology_values),
            allow_volume_expansion: Some(true),
        }
    }
}

impl PreProvisionedVolumeTestDriver for BlobCsiDriver {
    fn get_persistent_volume(
        &self,
        volume_id: &str,
        fs_type: Option<&str>,
        size: &str,
        reclaim_policy: Option<ReclaimPolicy>,
        namespace: &str,
        attributes: &BTreeMap<String, String>,
        node_stage_secret_ref: Option<&str>,
    ) -> PersistentVolume {
        let generate_name = format!(
            "{}-{}-preprovsioned-pv-",
            namespace,
            normalize_provisioner(&self.driver_name)
        );
        // pre-provisioned volumes outlive their claim unless told otherwise
        let policy = reclaim_policy.unwrap_or(ReclaimPolicy::Retain);

        let mut annotations = BTreeMap::new();
        annotations.insert(PROVISIONED_BY_ANNOTATION.to_string(), self.driver_name.clone());

        let mut capacity = BTreeMap::new();
        capacity.insert("storage".to_string(), Quantity(size.to_string()));

        let secret_ref = node_stage_secret_ref
            .filter(|name| !name.is_empty())
            .map(|name| SecretReference {
                name: Some(name.to_string()),
                namespace: Some(SECRET_NAMESPACE.to_string()),
            });

        PersistentVolume {
            metadata: ObjectMeta {
                generate_name: Some(generate_name),
                namespace: Some(namespace.to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                access_modes: Some(vec![AccessMode::ReadWriteMany.to_string()]),
                capacity: Some(capacity),
                persistent_volume_reclaim_policy: Some(policy.to_string()),
                csi: Some(CSIPersistentVolumeSource {
                    driver: self.driver_name.clone(),
                    volume_handle: volume_id.to_string(),
                    fs_type: fs_type.map(str::to_string),
                    volume_attributes: Some(attributes.clone()),
                    node_stage_secret_ref: secret_ref,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
