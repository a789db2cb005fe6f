//! Per-volume orchestration

use crate::domain::specs::VolumeDetails;
use crate::driver::{DynamicPvTestDriver, PreProvisionedVolumeTestDriver};
use crate::error::{Error, Result};
use crate::resources::{
    CleanupStack, TestContext, TestPersistentVolumeClaim, TestPreProvisionedPersistentVolume,
    TestStorageClass,
};
use k8s_openapi::api::storage::v1::StorageClass;
use std::collections::BTreeMap;
use tracing::info;

impl VolumeDetails {
    /// Create a StorageClass from this volume's settings and register its
    /// deletion
    pub async fn create_storage_class(
        &self,
        ctx: &TestContext,
        driver: &dyn DynamicPvTestDriver,
        parameters: &BTreeMap<String, String>,
        cleanup: &mut CleanupStack,
    ) -> Result<(TestStorageClass, StorageClass)> {
        info!("Setting up the StorageClass");
        let storage_class = driver.get_provision_storage_class(
            parameters,
            &self.mount_options,
            self.reclaim_policy,
            self.volume_binding_mode,
            &self.allowed_topology_values,
            &ctx.namespace,
        );
        let mut tsc = TestStorageClass::new(ctx.clone(), storage_class);
        let created = tsc.create().await?;
        cleanup.push(tsc.cleanup_action()?);
        Ok((tsc, created))
    }

    /// StorageClass, then a claim against it. The claim is waited on and
    /// validated only when it binds immediately; a `WaitForFirstConsumer`
    /// claim stays pending until a pod uses it.
    pub async fn setup_dynamic_persistent_volume_claim(
        &self,
        ctx: &TestContext,
        driver: &dyn DynamicPvTestDriver,
        parameters: &BTreeMap<String, String>,
        cleanup: &mut CleanupStack,
    ) -> Result<TestPersistentVolumeClaim> {
        let mut tpvc = match &self.storage_class {
            Some(existing) => {
                info!("Using existing StorageClass {}", existing);
                TestPersistentVolumeClaim::new(ctx.clone(), &self.claim_size, self.volume_mode(), None)
                    .with_storage_class_name(existing.clone())
            }
            None => {
                let (_, created) = self
                    .create_storage_class(ctx, driver, parameters, cleanup)
                    .await?;
                TestPersistentVolumeClaim::new(
                    ctx.clone(),
                    &self.claim_size,
                    self.volume_mode(),
                    Some(&created),
                )
            }
        };

        info!("Setting up the PVC and PV");
        if let Some(data_source) = &self.data_source {
            tpvc = tpvc.with_data_source(data_source.clone());
        }
        if !self.access_modes.is_empty() {
            info!("Setting up the PVC with access modes {:?}", self.access_modes);
            tpvc = tpvc.with_access_modes(&self.access_modes);
        }

        tpvc.create().await?;
        cleanup.push(tpvc.cleanup_action()?);

        if self.binds_immediately() {
            tpvc.wait_for_bound().await?;
            tpvc.validate_provisioned_persistent_volume()?;
        }
        Ok(tpvc)
    }

    /// PersistentVolume for `volume_id`, then a class-less claim that binds
    /// to it
    pub async fn setup_pre_provisioned_persistent_volume_claim(
        &self,
        ctx: &TestContext,
        driver: &dyn PreProvisionedVolumeTestDriver,
        cleanup: &mut CleanupStack,
    ) -> Result<TestPersistentVolumeClaim> {
        let volume_id = self
            .volume_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Error::InvalidVolumeDetails("pre-provisioned volume needs a volume id".into())
            })?;

        info!("Setting up the PV for {}", volume_id);
        let pv = driver.get_persistent_volume(
            volume_id,
            self.fs_type.as_deref(),
            &self.claim_size,
            self.reclaim_policy,
            &ctx.namespace,
            &self.attributes,
            self.node_stage_secret_ref.as_deref(),
        );
        let mut tpv = TestPreProvisionedPersistentVolume::new(ctx.clone(), pv);
        tpv.create().await?;
        cleanup.push(tpv.cleanup_action()?);

        info!("Setting up the PVC");
        let mut tpvc =
            TestPersistentVolumeClaim::new(ctx.clone(), &self.claim_size, self.volume_mode(), None);
        tpvc.create().await?;
        cleanup.push(tpvc.cleanup_action()?);
        tpvc.wait_for_bound().await?;
        tpvc.validate_provisioned_persistent_volume()?;
        Ok(tpvc)
    }
}
