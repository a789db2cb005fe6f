//! Dynamically provisioned volume scenarios

use super::{bind_deferred_claims, start_pod, PodExecCheck, Scenario};
use crate::domain::ports::{BackendVolumeProbeRef, HelperScriptsRef};
use crate::domain::specs::{PodDetails, ReclaimPolicy, VolumeDetails};
use crate::driver::DynamicPvTestDriverRef;
use crate::error::{Error, Result};
use crate::resources::{CleanupStack, Probe, TestContext};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

/// Message a write to a read-only mount leaves in the pod log
pub const READ_ONLY_FILE_SYSTEM_ERROR: &str = "Read-only file system";

/// Label pinning a pod to one node
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

pub const PROVISIONER_SECRET_NAME_PARAMETER: &str = "csi.storage.k8s.io/provisioner-secret-name";
pub const PROVISIONER_SECRET_NAMESPACE_PARAMETER: &str =
    "csi.storage.k8s.io/provisioner-secret-namespace";
pub const NODE_STAGE_SECRET_NAME_PARAMETER: &str = "csi.storage.k8s.io/node-stage-secret-name";
pub const NODE_STAGE_SECRET_NAMESPACE_PARAMETER: &str =
    "csi.storage.k8s.io/node-stage-secret-namespace";

// =============================================================================
// Create on demand
// =============================================================================

/// Each pod runs its command against freshly provisioned volumes and must
/// exit zero
pub struct DynamicallyProvisionedCmdVolumeTest {
    pub name: String,
    pub driver: DynamicPvTestDriverRef,
    pub pods: Vec<PodDetails>,
    pub storage_class_parameters: BTreeMap<String, String>,
}

/// Shared by the create-on-demand and bring-your-own-key scenarios
async fn run_pods_to_completion(
    ctx: &TestContext,
    driver: &DynamicPvTestDriverRef,
    pods: &[PodDetails],
    parameters: &BTreeMap<String, String>,
    cleanup: &mut CleanupStack,
) -> Result<()> {
    for pod in pods {
        let mut setup = pod
            .setup_with_dynamic_volumes(ctx, driver.clone(), parameters, cleanup)
            .await?;
        start_pod(&mut setup.pod, cleanup).await?;
        bind_deferred_claims(&mut setup.claims).await?;
        info!("Checking that the pod's command exits with no error");
        setup.pod.wait_for_success().await?;
    }
    Ok(())
}

#[async_trait]
impl Scenario for DynamicallyProvisionedCmdVolumeTest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TestContext, cleanup: &mut CleanupStack) -> Result<()> {
        run_pods_to_completion(
            ctx,
            &self.driver,
            &self.pods,
            &self.storage_class_parameters,
            cleanup,
        )
        .await
    }
}

// =============================================================================
// Delete pod
// =============================================================================

/// Data written by a deployment's pod survives the pod being replaced
pub struct DynamicallyProvisionedDeletePodTest {
    pub name: String,
    pub driver: DynamicPvTestDriverRef,
    pub pod: PodDetails,
    pub pod_check: Option<PodExecCheck>,
    pub storage_class_parameters: BTreeMap<String, String>,
}

#[async_trait]
impl Scenario for DynamicallyProvisionedDeletePodTest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TestContext, cleanup: &mut CleanupStack) -> Result<()> {
        let (mut deployment, _) = self
            .pod
            .setup_deployment(ctx, self.driver.clone(), &self.storage_class_parameters, cleanup)
            .await?;

        info!("Checking that the pod is running");
        deployment.wait_for_pod_ready().await?;

        info!("Deleting the pod for deployment");
        deployment.delete_pod_and_wait().await?;

        if let Some(check) = &self.pod_check {
            info!("Checking pod exec");
            deployment.exec(&check.cmd, &check.expected).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Read-only
// =============================================================================

/// Writing to a read-only mount must fail the pod
pub struct DynamicallyProvisionedReadOnlyVolumeTest {
    pub name: String,
    pub driver: DynamicPvTestDriverRef,
    pub pods: Vec<PodDetails>,
    pub storage_class_parameters: BTreeMap<String, String>,
}

#[async_trait]
impl Scenario for DynamicallyProvisionedReadOnlyVolumeTest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TestContext, cleanup: &mut CleanupStack) -> Result<()> {
        for pod in &self.pods {
            let mut setup = pod
                .setup_with_dynamic_volumes(ctx, self.driver.clone(), &self.storage_class_parameters, cleanup)
                .await?;
            start_pod(&mut setup.pod, cleanup).await?;

            info!("Checking that the pod's command exits with an error");
            setup.pod.wait_for_failure().await?;
            let logs = setup.pod.logs().await?;
            if !logs.contains(READ_ONLY_FILE_SYSTEM_ERROR) {
                return Err(Error::AssertionFailed(format!(
                    "pod log does not mention {:?}: {}",
                    READ_ONLY_FILE_SYSTEM_ERROR, logs
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Collocated pods
// =============================================================================

/// Several pods with their own volumes, optionally forced onto one node
pub struct DynamicallyProvisionedCollocatedPodTest {
    pub name: String,
    pub driver: DynamicPvTestDriverRef,
    pub pods: Vec<PodDetails>,
    pub colocate_pods: bool,
    pub storage_class_parameters: BTreeMap<String, String>,
}

#[async_trait]
impl Scenario for DynamicallyProvisionedCollocatedPodTest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TestContext, cleanup: &mut CleanupStack) -> Result<()> {
        let mut node: Option<String> = None;

        for pod in &self.pods {
            let mut setup = pod
                .setup_with_dynamic_volumes(ctx, self.driver.clone(), &self.storage_class_parameters, cleanup)
                .await?;
            if let Some(node) = node.as_ref().filter(|_| self.colocate_pods) {
                let mut selector = BTreeMap::new();
                selector.insert(HOSTNAME_LABEL.to_string(), node.clone());
                setup.pod.set_node_selector(selector);
            }

            start_pod(&mut setup.pod, cleanup).await?;
            bind_deferred_claims(&mut setup.claims).await?;
            setup.pod.wait_for_running().await?;

            if !self.colocate_pods {
                continue;
            }
            let scheduled = setup.pod.node_name().await?;
            if let Some(wanted) = &node {
                if scheduled.as_deref() != Some(wanted.as_str()) {
                    return Err(Error::AssertionFailed(format!(
                        "pod {} scheduled to {:?} instead of {}",
                        setup.pod.name()?,
                        scheduled,
                        wanted
                    )));
                }
            } else {
                node = scheduled;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Reclaim policy
// =============================================================================

/// Deleting a claim removes or keeps the backend volume according to the
/// class's reclaim policy
pub struct DynamicallyProvisionedReclaimPolicyTest {
    pub name: String,
    pub driver: DynamicPvTestDriverRef,
    pub volumes: Vec<VolumeDetails>,
    pub backend: BackendVolumeProbeRef,
    pub storage_class_parameters: BTreeMap<String, String>,
}

impl DynamicallyProvisionedReclaimPolicyTest {
    async fn wait_for_backend_volume_deleted(&self, ctx: &TestContext, volume_id: &str) -> Result<()> {
        let condition = format!("backend volume {} deleted", volume_id);
        let backend = self.backend.clone();
        ctx.poll_until(&condition, ctx.config.timeouts.volume_delete(), || {
            let backend = backend.clone();
            let volume_id = volume_id.to_string();
            async move {
                if backend.volume_exists(&volume_id).await? {
                    Ok(Probe::Pending("exists".to_string()))
                } else {
                    Ok(Probe::Ready(()))
                }
            }
        })
        .await
    }

    /// Watch a retained volume for the configured window. It must stay
    /// `Released` and its backend volume must stay present on every check.
    async fn confirm_retained(&self, ctx: &TestContext, pv_name: &str, volume_id: &str) -> Result<()> {
        let condition = format!("PersistentVolume {} retained", pv_name);
        let backend = self.backend.clone();
        let cluster = ctx.cluster.clone();
        let held = ctx
            .poll_until::<(), _, _>(&condition, ctx.config.timeouts.retain_check(), || {
                let (backend, cluster) = (backend.clone(), cluster.clone());
                let (pv_name, volume_id) = (pv_name.to_string(), volume_id.to_string());
                async move {
                    let phase = cluster
                        .get_persistent_volume(&pv_name)
                        .await?
                        .and_then(|pv| pv.status)
                        .and_then(|s| s.phase);
                    if phase.as_deref() != Some("Released") {
                        return Err(Error::AssertionFailed(format!(
                            "PersistentVolume {} left Released ({:?}) despite Retain policy",
                            pv_name, phase
                        )));
                    }
                    if !backend.volume_exists(&volume_id).await? {
                        return Err(Error::AssertionFailed(format!(
                            "backend volume {} was removed despite Retain policy",
                            volume_id
                        )));
                    }
                    Ok(Probe::Pending("Released".to_string()))
                }
            })
            .await;

        // lasting the whole window is the success case
        match held {
            Ok(()) | Err(Error::Timeout { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Scenario for DynamicallyProvisionedReclaimPolicyTest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TestContext, cleanup: &mut CleanupStack) -> Result<()> {
        for volume in &self.volumes {
            let mut claim = volume
                .setup_dynamic_persistent_volume_claim(
                    ctx,
                    self.driver.as_ref(),
                    &self.storage_class_parameters,
                    cleanup,
                )
                .await?;
            if claim.persistent_volume().is_none() {
                claim.wait_for_bound().await?;
            }
            let volume_id = claim
                .volume_handle()
                .map(str::to_string)
                .ok_or_else(|| Error::AssertionFailed("bound volume has no CSI handle".into()))?;

            claim.delete().await?;

            match claim.reclaim_policy() {
                Some(ReclaimPolicy::Retain) => {
                    claim.wait_for_persistent_volume_phase("Released").await?;
                    let pv_name = claim
                        .persistent_volume()
                        .and_then(|pv| pv.metadata.name.clone())
                        .unwrap_or_default();
                    self.confirm_retained(ctx, &pv_name, &volume_id).await?;
                    info!("Backend volume {} retained, removing it", volume_id);
                    claim.delete_bound_persistent_volume().await?;
                    claim.delete_backing_volume(self.backend.as_ref()).await?;
                }
                _ => {
                    self.wait_for_backend_volume_deleted(ctx, &volume_id).await?;
                    info!("Backend volume {} deleted with its claim", volume_id);
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Multiple volumes
// =============================================================================

/// One pod with many volumes, storage account SKU rotating per volume
pub struct DynamicallyProvisionedPodWithMultiplePVsTest {
    pub name: String,
    pub driver: DynamicPvTestDriverRef,
    pub pods: Vec<PodDetails>,
}

#[async_trait]
impl Scenario for DynamicallyProvisionedPodWithMultiplePVsTest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TestContext, cleanup: &mut CleanupStack) -> Result<()> {
        for pod in &self.pods {
            let mut setup = pod
                .setup_with_dynamic_multiple_volumes(ctx, self.driver.clone(), cleanup)
                .await?;
            start_pod(&mut setup.pod, cleanup).await?;
            bind_deferred_claims(&mut setup.claims).await?;
            info!("Checking that the pod's command exits with no error");
            setup.pod.wait_for_success().await?;
        }
        Ok(())
    }
}

// =============================================================================
// Invalid mount options
// =============================================================================

/// Mounting with options the driver rejects must surface a FailedMount event
pub struct DynamicallyProvisionedInvalidMountOptions {
    pub name: String,
    pub driver: DynamicPvTestDriverRef,
    pub pods: Vec<PodDetails>,
    pub storage_class_parameters: BTreeMap<String, String>,
}

#[async_trait]
impl Scenario for DynamicallyProvisionedInvalidMountOptions {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TestContext, cleanup: &mut CleanupStack) -> Result<()> {
        for pod in &self.pods {
            let mut setup = pod
                .setup_with_dynamic_volumes(ctx, self.driver.clone(), &self.storage_class_parameters, cleanup)
                .await?;
            start_pod(&mut setup.pod, cleanup).await?;

            info!("Checking that the pod has a 'FailedMount' event");
            let message = setup.pod.wait_for_failed_mount_event().await?;
            info!("FailedMount: {}", message);
        }
        Ok(())
    }
}

// =============================================================================
// Resize
// =============================================================================

/// Grow a claim in use and wait for claim and volume to report the new size
pub struct DynamicallyProvisionedResizeVolumeTest {
    pub name: String,
    pub driver: DynamicPvTestDriverRef,
    pub pod: PodDetails,
    /// Bytes added to the first claim
    pub expand_by: u64,
    pub storage_class_parameters: BTreeMap<String, String>,
}

#[async_trait]
impl Scenario for DynamicallyProvisionedResizeVolumeTest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TestContext, cleanup: &mut CleanupStack) -> Result<()> {
        let mut setup = self
            .pod
            .setup_with_dynamic_volumes(ctx, self.driver.clone(), &self.storage_class_parameters, cleanup)
            .await?;
        start_pod(&mut setup.pod, cleanup).await?;
        bind_deferred_claims(&mut setup.claims).await?;
        setup.pod.wait_for_success().await?;

        let claim = setup.claims.first_mut().ok_or_else(|| {
            Error::InvalidVolumeDetails("resize scenario needs a claim-backed volume".into())
        })?;
        let new_size = claim.expand(self.expand_by).await?;
        claim.wait_for_size(&new_size).await?;
        info!("Claim {} resized to {}", claim.name()?, new_size);
        Ok(())
    }
}

// =============================================================================
// Bring your own key
// =============================================================================

/// Create on demand with the storage account key supplied through a secret
/// resolved at run time
pub struct BringYourOwnKeyTest {
    pub name: String,
    pub driver: DynamicPvTestDriverRef,
    pub pods: Vec<PodDetails>,
    pub scripts: HelperScriptsRef,
    /// Namespace the account secret lives in
    pub secret_namespace: String,
    pub storage_class_parameters: BTreeMap<String, String>,
}

/// Copy of `base` with the provisioner and node-stage secret keys set
pub fn bring_your_own_key_parameters(
    base: &BTreeMap<String, String>,
    secret_name: &str,
    secret_namespace: &str,
) -> BTreeMap<String, String> {
    let mut params = base.clone();
    for key in [PROVISIONER_SECRET_NAME_PARAMETER, NODE_STAGE_SECRET_NAME_PARAMETER] {
        params.insert(key.to_string(), secret_name.to_string());
    }
    for key in [
        PROVISIONER_SECRET_NAMESPACE_PARAMETER,
        NODE_STAGE_SECRET_NAMESPACE_PARAMETER,
    ] {
        params.insert(key.to_string(), secret_namespace.to_string());
    }
    params
}

#[async_trait]
impl Scenario for BringYourOwnKeyTest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TestContext, cleanup: &mut CleanupStack) -> Result<()> {
        let secret_name = self.scripts.storage_account_secret_name().await?;
        let params = bring_your_own_key_parameters(
            &self.storage_class_parameters,
            &secret_name,
            &self.secret_namespace,
        );
        run_pods_to_completion(ctx, &self.driver, &self.pods, &params, cleanup).await
    }
}
