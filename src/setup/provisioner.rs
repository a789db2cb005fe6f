//! Provisioning strategies

use crate::domain::specs::VolumeDetails;
use crate::driver::{BlobCsiDriver, DynamicPvTestDriverRef, PreProvisionedVolumeTestDriverRef};
use crate::error::Result;
use crate::resources::{CleanupStack, TestContext, TestPersistentVolumeClaim};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::CSIVolumeSource;
use std::collections::BTreeMap;
use std::sync::Arc;

/// StorageClass parameter key selecting the storage account SKU
pub const SKU_NAME_PARAMETER: &str = "skuName";

/// What a provisioner hands back for one volume of a pod
pub enum ProvisionedVolume {
    /// A claim, bound already unless its class defers binding
    Claim(TestPersistentVolumeClaim),
    /// A CSI source declared directly in the pod spec
    Inline(CSIVolumeSource),
}

/// One way of realizing a `VolumeDetails`
#[async_trait]
pub trait VolumeProvisioner: Send + Sync {
    /// Create whatever backs the volume at zero-based `index` of a pod
    async fn provision(
        &self,
        ctx: &TestContext,
        volume: &VolumeDetails,
        index: usize,
        cleanup: &mut CleanupStack,
    ) -> Result<ProvisionedVolume>;

    fn strategy(&self) -> &'static str;
}

// =============================================================================
// Dynamic
// =============================================================================

/// StorageClass parameters for dynamically provisioned volumes
#[derive(Debug, Clone)]
pub enum StorageClassParameters {
    /// Same parameters for every volume
    Fixed(BTreeMap<String, String>),
    /// `skuName` cycles through the list by volume index
    RotateSku(Vec<String>),
}

impl StorageClassParameters {
    /// Single `skuName` parameter
    pub fn sku(sku: &str) -> Self {
        let mut params = BTreeMap::new();
        params.insert(SKU_NAME_PARAMETER.to_string(), sku.to_string());
        Self::Fixed(params)
    }

    pub fn for_volume(&self, index: usize) -> BTreeMap<String, String> {
        match self {
            Self::Fixed(params) => params.clone(),
            Self::RotateSku(skus) if skus.is_empty() => BTreeMap::new(),
            Self::RotateSku(skus) => {
                let mut params = BTreeMap::new();
                params.insert(SKU_NAME_PARAMETER.to_string(), skus[index % skus.len()].clone());
                params
            }
        }
    }
}

/// StorageClass per volume, then a claim against it
pub struct DynamicProvisioner {
    driver: DynamicPvTestDriverRef,
    parameters: StorageClassParameters,
}

impl DynamicProvisioner {
    pub fn new(driver: DynamicPvTestDriverRef, parameters: StorageClassParameters) -> Self {
        Self { driver, parameters }
    }
}

#[async_trait]
impl VolumeProvisioner for DynamicProvisioner {
    async fn provision(
        &self,
        ctx: &TestContext,
        volume: &VolumeDetails,
        index: usize,
        cleanup: &mut CleanupStack,
    ) -> Result<ProvisionedVolume> {
        let params = self.parameters.for_volume(index);
        let claim = volume
            .setup_dynamic_persistent_volume_claim(ctx, self.driver.as_ref(), &params, cleanup)
            .await?;
        Ok(ProvisionedVolume::Claim(claim))
    }

    fn strategy(&self) -> &'static str {
        "dynamic"
    }
}

// =============================================================================
// Pre-provisioned
// =============================================================================

/// PersistentVolume for a known backend volume, then a class-less claim
pub struct PreProvisionedProvisioner {
    driver: PreProvisionedVolumeTestDriverRef,
}

impl PreProvisionedProvisioner {
    pub fn new(driver: PreProvisionedVolumeTestDriverRef) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl VolumeProvisioner for PreProvisionedProvisioner {
    async fn provision(
        &self,
        ctx: &TestContext,
        volume: &VolumeDetails,
        _index: usize,
        cleanup: &mut CleanupStack,
    ) -> Result<ProvisionedVolume> {
        let claim = volume
            .setup_pre_provisioned_persistent_volume_claim(ctx, self.driver.as_ref(), cleanup)
            .await?;
        Ok(ProvisionedVolume::Claim(claim))
    }

    fn strategy(&self) -> &'static str {
        "pre-provisioned"
    }
}

// =============================================================================
// Inline
// =============================================================================

/// No claim at all; the pod references the blob container directly
pub struct InlineProvisioner {
    driver: Arc<BlobCsiDriver>,
    secret_name: String,
    container_name: String,
    read_only: bool,
}

impl InlineProvisioner {
    pub fn new(
        driver: Arc<BlobCsiDriver>,
        secret_name: impl Into<String>,
        container_name: impl Into<String>,
        read_only: bool,
    ) -> Self {
        Self {
            driver,
            secret_name: secret_name.into(),
            container_name: container_name.into(),
            read_only,
        }
    }
}

#[async_trait]
impl VolumeProvisioner for InlineProvisioner {
    async fn provision(
        &self,
        _ctx: &TestContext,
        _volume: &VolumeDetails,
        _index: usize,
        _cleanup: &mut CleanupStack,
    ) -> Result<ProvisionedVolume> {
        Ok(ProvisionedVolume::Inline(self.driver.inline_volume_source(
            &self.secret_name,
            &self.container_name,
            self.read_only,
        )))
    }

    fn strategy(&self) -> &'static str {
        "inline"
    }
}
