//! Pod and deployment orchestration

use super::provisioner::{
    DynamicProvisioner, InlineProvisioner, PreProvisionedProvisioner, ProvisionedVolume,
    StorageClassParameters, VolumeProvisioner,
};
use crate::domain::specs::{PodDetails, VolumeAttachment};
use crate::driver::{BlobCsiDriver, DynamicPvTestDriverRef, PreProvisionedVolumeTestDriverRef};
use crate::error::{Error, Result};
use crate::resources::storage_class::not_created;
use crate::resources::{
    CleanupStack, TestContext, TestDeployment, TestPersistentVolumeClaim, TestPod,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// A pod spec with every volume attached, plus the claims behind them.
/// The pod itself is not created yet.
pub struct PodSetup {
    pub pod: TestPod,
    /// Claims in volume order; empty for inline volumes
    pub claims: Vec<TestPersistentVolumeClaim>,
}

impl PodDetails {
    /// Provision every volume with `provisioner` and attach it to a new pod
    /// spec, in list order
    pub async fn setup(
        &self,
        ctx: &TestContext,
        provisioner: &dyn VolumeProvisioner,
        cleanup: &mut CleanupStack,
    ) -> Result<PodSetup> {
        let mut pod = TestPod::new(ctx.clone(), &self.cmd);
        let mut claims = Vec::with_capacity(self.volumes.len());

        for (n, volume) in self.volumes.iter().enumerate() {
            let names = volume.attachment.names(n);
            match provisioner.provision(ctx, volume, n, cleanup).await? {
                ProvisionedVolume::Claim(tpvc) => {
                    let pvc = tpvc
                        .persistent_volume_claim()
                        .ok_or_else(|| not_created("PersistentVolumeClaim"))?;
                    match &volume.attachment {
                        VolumeAttachment::Device(_) => {
                            pod.setup_raw_block_volume(pvc, &names.volume_name, &names.path)
                        }
                        VolumeAttachment::Mount(m) => {
                            pod.setup_volume(pvc, &names.volume_name, &names.path, m.read_only)
                        }
                    }
                    claims.push(tpvc);
                }
                ProvisionedVolume::Inline(source) => {
                    if matches!(volume.attachment, VolumeAttachment::Device(_)) {
                        return Err(Error::InvalidVolumeDetails(
                            "inline volumes cannot be raw block devices".into(),
                        ));
                    }
                    pod.setup_inline_volume(&names.volume_name, &names.path, source);
                }
            }
        }

        info!(
            "Prepared pod with {} {} volume(s)",
            self.volumes.len(),
            provisioner.strategy()
        );
        Ok(PodSetup { pod, claims })
    }

    pub async fn setup_with_dynamic_volumes(
        &self,
        ctx: &TestContext,
        driver: DynamicPvTestDriverRef,
        parameters: &BTreeMap<String, String>,
        cleanup: &mut CleanupStack,
    ) -> Result<PodSetup> {
        let provisioner =
            DynamicProvisioner::new(driver, StorageClassParameters::Fixed(parameters.clone()));
        self.setup(ctx, &provisioner, cleanup).await
    }

    /// Dynamic volumes whose storage account SKU rotates through the ones
    /// the configured cloud supports
    pub async fn setup_with_dynamic_multiple_volumes(
        &self,
        ctx: &TestContext,
        driver: DynamicPvTestDriverRef,
        cleanup: &mut CleanupStack,
    ) -> Result<PodSetup> {
        let skus = ctx
            .config
            .supported_storage_account_types()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let provisioner = DynamicProvisioner::new(driver, StorageClassParameters::RotateSku(skus));
        self.setup(ctx, &provisioner, cleanup).await
    }

    pub async fn setup_with_pre_provisioned_volumes(
        &self,
        ctx: &TestContext,
        driver: PreProvisionedVolumeTestDriverRef,
        cleanup: &mut CleanupStack,
    ) -> Result<PodSetup> {
        let provisioner = PreProvisionedProvisioner::new(driver);
        self.setup(ctx, &provisioner, cleanup).await
    }

    pub async fn setup_with_csi_inline_volumes(
        &self,
        ctx: &TestContext,
        driver: Arc<BlobCsiDriver>,
        secret_name: &str,
        share_name: &str,
        read_only: bool,
        cleanup: &mut CleanupStack,
    ) -> Result<PodSetup> {
        let provisioner = InlineProvisioner::new(driver, secret_name, share_name, read_only);
        self.setup(ctx, &provisioner, cleanup).await
    }

    /// Dynamic setup of the first volume wrapped in a single-replica
    /// deployment. Also returns the backend volume id of the bound volume.
    /// A `WaitForFirstConsumer` claim is bound and validated once the
    /// deployment exists.
    pub async fn setup_deployment(
        &self,
        ctx: &TestContext,
        driver: DynamicPvTestDriverRef,
        parameters: &BTreeMap<String, String>,
        cleanup: &mut CleanupStack,
    ) -> Result<(TestDeployment, Option<String>)> {
        let volume = self.volumes.first().ok_or_else(|| {
            Error::InvalidVolumeDetails("deployment setup needs at least one volume".into())
        })?;
        let VolumeAttachment::Mount(mount) = &volume.attachment else {
            return Err(Error::InvalidVolumeDetails(
                "deployment setup supports filesystem volumes only".into(),
            ));
        };

        let mut tpvc = volume
            .setup_dynamic_persistent_volume_claim(ctx, driver.as_ref(), parameters, cleanup)
            .await?;
        let pvc = tpvc
            .persistent_volume_claim()
            .ok_or_else(|| not_created("PersistentVolumeClaim"))?;

        info!("Setting up the Deployment");
        let names = volume.attachment.names(0);
        let mut deployment = TestDeployment::new(
            ctx.clone(),
            &self.cmd,
            pvc,
            &names.volume_name,
            &names.path,
            mount.read_only,
        );
        deployment.create().await?;
        cleanup.push(deployment.cleanup_action()?);

        if !volume.binds_immediately() {
            tpvc.wait_for_bound().await?;
            tpvc.validate_provisioned_persistent_volume()?;
        }

        let volume_id = tpvc.volume_handle().map(str::to_string);
        Ok((deployment, volume_id))
    }
}
