//! Suites
//!
//! The dynamic provisioning suite is the fixed set of scenarios run against
//! every driver build. The extended suite adds scenarios that need a
//! pre-existing blob container or account secret and is empty unless the
//! configuration names them.

use super::*;
use crate::config::HarnessConfig;
use crate::domain::ports::{BackendVolumeProbeRef, HelperScriptsRef};
use crate::domain::specs::{PodDetails, ReclaimPolicy, VolumeDetails};
use crate::driver::BlobCsiDriver;
use crate::setup::StorageClassParameters;
use std::collections::BTreeMap;
use std::sync::Arc;

const GIB: u64 = 1024 * 1024 * 1024;

const WRITE_AND_GREP: &str =
    "echo 'hello world' > /mnt/test-1/data && grep 'hello world' /mnt/test-1/data";
const APPEND_AND_WAIT: &str =
    "echo 'hello world' >> /mnt/test-1/data && while true; do sleep 1; done";
const APPEND_DATE_FOREVER: &str =
    "while true; do echo $(date -u) >> /mnt/test-1/data; sleep 1; done";

const ALLOW_OTHER: &str = "-o allow_other";
const FILE_CACHE_TIMEOUT: &str = "--file-cache-timeout-in-seconds=120";

/// Namespace holding the account secret used by bring-your-own-key
const SECRET_NAMESPACE: &str = "default";

/// `skuName` parameter, falling back to `Standard_LRS` when the configured
/// cloud does not offer `sku`
fn sku_parameters(config: &HarnessConfig, sku: &str) -> BTreeMap<String, String> {
    let sku = if config.supported_storage_account_types().contains(&sku) {
        sku
    } else {
        "Standard_LRS"
    };
    StorageClassParameters::sku(sku).for_volume(0)
}

fn scenario(s: impl Scenario + 'static) -> ScenarioRef {
    Arc::new(s)
}

fn mount_options_volume() -> VolumeDetails {
    VolumeDetails::new("10Gi").with_mount_options([ALLOW_OTHER, FILE_CACHE_TIMEOUT])
}

/// The ten dynamic provisioning scenarios
pub fn dynamic_provisioning_suite(
    driver: Arc<BlobCsiDriver>,
    config: &HarnessConfig,
    backend: BackendVolumeProbeRef,
    scripts: HelperScriptsRef,
) -> Vec<ScenarioRef> {
    vec![
        scenario(DynamicallyProvisionedCmdVolumeTest {
            name: "should create a volume on demand".into(),
            driver: driver.clone(),
            pods: vec![PodDetails::new(WRITE_AND_GREP, vec![mount_options_volume()])],
            storage_class_parameters: sku_parameters(config, "Standard_LRS"),
        }),
        scenario(DynamicallyProvisionedDeletePodTest {
            name: "should create a deployment object, write and read to it, delete the pod and write and read to it again".into(),
            driver: driver.clone(),
            pod: PodDetails::new(
                APPEND_AND_WAIT,
                vec![mount_options_volume().with_fs_type("ext3")],
            ),
            pod_check: Some(PodExecCheck::new(
                ["cat", "/mnt/test-1/data"],
                "hello world\nhello world\n",
            )),
            storage_class_parameters: sku_parameters(config, "Premium_LRS"),
        }),
        scenario(DynamicallyProvisionedReadOnlyVolumeTest {
            name: "should create a volume on demand and mount it as readOnly in a pod".into(),
            driver: driver.clone(),
            pods: vec![PodDetails::new(
                "touch /mnt/test-1/data",
                vec![VolumeDetails::new("10Gi").with_fs_type("ext4").read_only()],
            )],
            storage_class_parameters: sku_parameters(config, "Standard_GRS"),
        }),
        scenario(DynamicallyProvisionedCollocatedPodTest {
            name: "should create multiple PV objects, bind to PVCs and attach all to different pods on the same node".into(),
            driver: driver.clone(),
            pods: vec![
                PodDetails::new(
                    APPEND_DATE_FOREVER,
                    vec![VolumeDetails::new("10Gi").with_fs_type("ext3")],
                ),
                PodDetails::new(
                    APPEND_DATE_FOREVER,
                    vec![VolumeDetails::new("10Gi").with_fs_type("ext4")],
                ),
            ],
            colocate_pods: true,
            storage_class_parameters: sku_parameters(config, "Standard_RAGRS"),
        }),
        scenario(DynamicallyProvisionedReclaimPolicyTest {
            name: "should delete PV with reclaimPolicy \"Delete\"".into(),
            driver: driver.clone(),
            volumes: vec![VolumeDetails::new("10Gi")
                .with_fs_type("ext4")
                .with_reclaim_policy(ReclaimPolicy::Delete)],
            backend: backend.clone(),
            storage_class_parameters: sku_parameters(config, "Standard_LRS"),
        }),
        scenario(DynamicallyProvisionedReclaimPolicyTest {
            name: "should retain PV with reclaimPolicy \"Retain\"".into(),
            driver: driver.clone(),
            volumes: vec![VolumeDetails::new("10Gi")
                .with_fs_type("ext4")
                .with_reclaim_policy(ReclaimPolicy::Retain)],
            backend,
            storage_class_parameters: sku_parameters(config, "Standard_GRS"),
        }),
        scenario(DynamicallyProvisionedPodWithMultiplePVsTest {
            name: "should create a pod with multiple volumes".into(),
            driver: driver.clone(),
            pods: vec![PodDetails::new(
                WRITE_AND_GREP,
                vec![VolumeDetails::new("10Gi"); 6],
            )],
        }),
        scenario(DynamicallyProvisionedInvalidMountOptions {
            name: "should receive FailedMount event with invalid mount options".into(),
            driver: driver.clone(),
            pods: vec![PodDetails::new(
                WRITE_AND_GREP,
                vec![VolumeDetails::new("10Gi").with_mount_options(["invalid", "mount", "options"])],
            )],
            storage_class_parameters: sku_parameters(config, "Standard_LRS"),
        }),
        scenario(BringYourOwnKeyTest {
            name: "should create a volume on demand (Bring Your Own Key)".into(),
            driver: driver.clone(),
            pods: vec![PodDetails::new(WRITE_AND_GREP, vec![mount_options_volume()])],
            scripts,
            secret_namespace: SECRET_NAMESPACE.into(),
            storage_class_parameters: BTreeMap::new(),
        }),
        scenario(DynamicallyProvisionedResizeVolumeTest {
            name: "should create a volume on demand and resize it".into(),
            driver,
            pod: PodDetails::new(WRITE_AND_GREP, vec![VolumeDetails::new("10Gi")]),
            expand_by: 10 * GIB,
            storage_class_parameters: sku_parameters(config, "Standard_LRS"),
        }),
    ]
}

/// Pre-provisioned and inline scenarios, for whichever of them the backend
/// configuration supports
pub fn extended_suite(driver: Arc<BlobCsiDriver>, config: &HarnessConfig) -> Vec<ScenarioRef> {
    let backend = &config.backend;
    let mut scenarios: Vec<ScenarioRef> = Vec::new();

    if let Some(volume_id) = &backend.pre_provisioned_volume_id {
        let mut volume = VolumeDetails::new("10Gi");
        volume.volume_id = Some(volume_id.clone());
        volume.node_stage_secret_ref = backend.account_secret_name.clone();
        scenarios.push(scenario(PreProvisionedCmdVolumeTest {
            name: "should use a pre-provisioned volume".into(),
            driver: driver.clone(),
            pods: vec![PodDetails::new(WRITE_AND_GREP, vec![volume])],
        }));
    }

    if let (Some(secret), Some(container)) =
        (&backend.account_secret_name, &backend.inline_share_name)
    {
        scenarios.push(scenario(InlineVolumeTest {
            name: "should create an inline volume by in-tree secret".into(),
            driver,
            pods: vec![PodDetails::new(WRITE_AND_GREP, vec![VolumeDetails::new("10Gi")])],
            secret_name: secret.clone(),
            container_name: container.clone(),
            read_only: false,
        }));
    }

    scenarios
}
