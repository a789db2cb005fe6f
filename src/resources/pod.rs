//! Pod wrapper

use super::storage_class::not_created;
use super::{CleanupAction, Probe, TestContext};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{
    CSIVolumeSource, Container, PersistentVolumeClaim, PersistentVolumeClaimVolumeSource, Pod,
    PodSpec, Volume, VolumeDevice, VolumeMount,
};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const POD_GENERATE_NAME: &str = "blob-volume-tester-";
pub const CONTAINER_NAME: &str = "volume-tester";

/// Event reason reported by the kubelet when a volume cannot be mounted
pub const FAILED_MOUNT_REASON: &str = "FailedMount";

/// Bare pod running one shell command against its volumes
pub struct TestPod {
    ctx: TestContext,
    cmd: String,
    volumes: Vec<Volume>,
    volume_mounts: Vec<VolumeMount>,
    volume_devices: Vec<VolumeDevice>,
    node_selector: BTreeMap<String, String>,
    created: Option<Pod>,
}

impl TestPod {
    pub fn new(ctx: TestContext, cmd: impl Into<String>) -> Self {
        let mut node_selector = BTreeMap::new();
        node_selector.insert("kubernetes.io/os".to_string(), "linux".to_string());
        Self {
            ctx,
            cmd: cmd.into(),
            volumes: Vec::new(),
            volume_mounts: Vec::new(),
            volume_devices: Vec::new(),
            node_selector,
            created: None,
        }
    }

    /// Mount a claim as a filesystem
    pub fn setup_volume(
        &mut self,
        pvc: &PersistentVolumeClaim,
        name: &str,
        mount_path: &str,
        read_only: bool,
    ) {
        self.volume_mounts.push(VolumeMount {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            read_only: Some(read_only),
            ..Default::default()
        });
        self.volumes.push(claim_volume(pvc, name));
    }

    /// Expose a block-mode claim as a raw device
    pub fn setup_raw_block_volume(&mut self, pvc: &PersistentVolumeClaim, name: &str, device_path: &str) {
        self.volume_devices.push(VolumeDevice {
            name: name.to_string(),
            device_path: device_path.to_string(),
        });
        self.volumes.push(claim_volume(pvc, name));
    }

    /// Declare a CSI volume directly in the pod spec
    pub fn setup_inline_volume(&mut self, name: &str, mount_path: &str, source: CSIVolumeSource) {
        self.volume_mounts.push(VolumeMount {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            read_only: source.read_only,
            ..Default::default()
        });
        self.volumes.push(Volume {
            name: name.to_string(),
            csi: Some(source),
            ..Default::default()
        });
    }

    /// Add node selector labels on top of the linux default
    pub fn set_node_selector(&mut self, selector: BTreeMap<String, String>) {
        self.node_selector.extend(selector);
    }

    /// Claim names referenced by this pod, in attachment order
    pub fn claim_names(&self) -> Vec<String> {
        self.volumes
            .iter()
            .filter_map(|v| v.persistent_volume_claim.as_ref())
            .map(|c| c.claim_name.clone())
            .collect()
    }

    fn build(&self) -> Pod {
        let container = Container {
            name: CONTAINER_NAME.to_string(),
            image: Some(self.ctx.config.image.clone()),
            command: Some(vec!["/bin/sh".to_string()]),
            args: Some(vec!["-c".to_string(), self.cmd.clone()]),
            volume_mounts: (!self.volume_mounts.is_empty()).then(|| self.volume_mounts.clone()),
            volume_devices: (!self.volume_devices.is_empty()).then(|| self.volume_devices.clone()),
            ..Default::default()
        };

        Pod {
            metadata: ObjectMeta {
                generate_name: Some(POD_GENERATE_NAME.to_string()),
                namespace: Some(self.ctx.namespace.clone()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_selector: Some(self.node_selector.clone()),
                containers: vec![container],
                restart_policy: Some("Never".to_string()),
                volumes: (!self.volumes.is_empty()).then(|| self.volumes.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub async fn create(&mut self) -> Result<Pod> {
        info!("Creating pod in {} running {:?}", self.ctx.namespace, self.cmd);
        let created = self
            .ctx
            .cluster
            .create_pod(&self.ctx.namespace, &self.build())
            .await?;
        info!(
            "Created pod {}",
            created.metadata.name.as_deref().unwrap_or_default()
        );
        self.created = Some(created.clone());
        Ok(created)
    }

    pub fn name(&self) -> Result<&str> {
        self.created
            .as_ref()
            .and_then(|pod| pod.metadata.name.as_deref())
            .ok_or_else(|| not_created("Pod"))
    }

    pub fn cleanup_action(&self) -> Result<CleanupAction> {
        Ok(CleanupAction::DeletePod {
            namespace: self.ctx.namespace.clone(),
            name: self.name()?.to_string(),
        })
    }

    async fn wait_for_phase(&self, wanted: &'static str, timeout: std::time::Duration) -> Result<Pod> {
        let name = self.name()?.to_string();
        let namespace = self.ctx.namespace.clone();
        let cluster = self.ctx.cluster.clone();
        let condition = format!("pod {} phase {}", name, wanted);
        info!("Waiting for pod {}/{} to be {}", namespace, name, wanted);

        self.ctx
            .poll_until(&condition, timeout, || {
                let cluster = cluster.clone();
                let (namespace, name) = (namespace.clone(), name.clone());
                async move {
                    let pod = cluster.get_pod(&namespace, &name).await?.ok_or_else(|| {
                        Error::ResourceNotFound {
                            kind: "Pod".into(),
                            name: name.clone(),
                        }
                    })?;
                    let phase = pod_phase(&pod);
                    if phase == wanted {
                        return Ok(Probe::Ready(pod));
                    }
                    // a terminal phase other than the wanted one never changes again
                    if is_terminal(&phase) {
                        let logs = cluster.pod_logs(&namespace, &name).await.unwrap_or_default();
                        debug!("pod {} logs: {}", name, logs);
                        return Err(Error::UnexpectedPodPhase {
                            pod: name.clone(),
                            expected: wanted.to_string(),
                            actual: phase_with_logs(&phase, &logs),
                        });
                    }
                    Ok(Probe::Pending(phase))
                }
            })
            .await
    }

    /// Wait for the command to exit zero
    pub async fn wait_for_success(&self) -> Result<()> {
        self.wait_for_phase("Succeeded", self.ctx.config.timeouts.pod_complete())
            .await
            .map(|_| ())
    }

    /// Wait for the pod to be running; used for long-lived commands
    pub async fn wait_for_running(&self) -> Result<()> {
        self.wait_for_phase("Running", self.ctx.config.timeouts.pod_start())
            .await
            .map(|_| ())
    }

    /// Wait for the command to exit non-zero
    pub async fn wait_for_failure(&self) -> Result<()> {
        self.wait_for_phase("Failed", self.ctx.config.timeouts.pod_complete())
            .await
            .map(|_| ())
    }

    /// Wait until a FailedMount event is recorded for the pod
    pub async fn wait_for_failed_mount_event(&self) -> Result<String> {
        let name = self.name()?.to_string();
        let namespace = self.ctx.namespace.clone();
        let cluster = self.ctx.cluster.clone();
        let condition = format!("{} event for pod {}", FAILED_MOUNT_REASON, name);
        info!("Waiting for {} event on pod {}/{}", FAILED_MOUNT_REASON, namespace, name);

        self.ctx
            .poll_until(&condition, self.ctx.config.timeouts.event(), || {
                let cluster = cluster.clone();
                let (namespace, name) = (namespace.clone(), name.clone());
                async move {
                    let events = cluster.list_events(&namespace, &name).await?;
                    let failed = events
                        .iter()
                        .find(|e| e.reason.as_deref() == Some(FAILED_MOUNT_REASON));
                    match failed {
                        Some(event) => Ok(Probe::Ready(event.message.clone().unwrap_or_default())),
                        None => Ok(Probe::Pending(format!("{} events", events.len()))),
                    }
                }
            })
            .await
    }

    pub async fn logs(&self) -> Result<String> {
        self.ctx.cluster.pod_logs(&self.ctx.namespace, self.name()?).await
    }

    /// Node the pod was scheduled to, if any yet
    pub async fn node_name(&self) -> Result<Option<String>> {
        let pod = self.ctx.cluster.get_pod(&self.ctx.namespace, self.name()?).await?;
        Ok(pod.and_then(|p| p.spec).and_then(|s| s.node_name))
    }
}

fn claim_volume(pvc: &PersistentVolumeClaim, name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: pvc.metadata.name.clone().unwrap_or_default(),
            read_only: None,
        }),
        ..Default::default()
    }
}

pub(crate) fn pod_phase(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| "Pending".to_string())
}

fn is_terminal(phase: &str) -> bool {
    phase == "Succeeded" || phase == "Failed"
}

fn phase_with_logs(phase: &str, logs: &str) -> String {
    let logs = logs.trim();
    if logs.is_empty() {
        phase.to_string()
    } else {
        format!("{} ({})", phase, logs)
    }
}
