//! Scenarios over volumes that exist before the test: pre-provisioned
//! PersistentVolumes and CSI inline volumes

use super::{start_pod, Scenario};
use crate::domain::specs::PodDetails;
use crate::driver::{BlobCsiDriver, PreProvisionedVolumeTestDriverRef};
use crate::error::Result;
use crate::resources::{CleanupStack, TestContext};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Pods run their command against hand-made PersistentVolumes for
/// existing blob containers
pub struct PreProvisionedCmdVolumeTest {
    pub name: String,
    pub driver: PreProvisionedVolumeTestDriverRef,
    pub pods: Vec<PodDetails>,
}

#[async_trait]
impl Scenario for PreProvisionedCmdVolumeTest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TestContext, cleanup: &mut CleanupStack) -> Result<()> {
        for pod in &self.pods {
            let mut setup = pod
                .setup_with_pre_provisioned_volumes(ctx, self.driver.clone(), cleanup)
                .await?;
            start_pod(&mut setup.pod, cleanup).await?;
            info!("Checking that the pod's command exits with no error");
            setup.pod.wait_for_success().await?;
        }
        Ok(())
    }
}

/// Pods reference a blob container directly through a CSI inline volume
pub struct InlineVolumeTest {
    pub name: String,
    pub driver: Arc<BlobCsiDriver>,
    pub pods: Vec<PodDetails>,
    pub secret_name: String,
    pub container_name: String,
    pub read_only: bool,
}

#[async_trait]
impl Scenario for InlineVolumeTest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TestContext, cleanup: &mut CleanupStack) -> Result<()> {
        for pod in &self.pods {
            let mut setup = pod
                .setup_with_csi_inline_volumes(
                    ctx,
                    self.driver.clone(),
                    &self.secret_name,
                    &self.container_name,
                    self.read_only,
                    cleanup,
                )
                .await?;
            start_pod(&mut setup.pod, cleanup).await?;
            info!("Checking that the pod's command exits with no error");
            setup.pod.wait_for_success().await?;
        }
        Ok(())
    }
}
