//! Deployment wrapper
//!
//! A single-replica deployment whose pod can be deleted and replaced by the
//! controller while the claim, and the data on it, stays put.

use super::storage_class::not_created;
use super::{CleanupAction, Probe, TestContext};
use crate::error::{Error, Result};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaim, PersistentVolumeClaimVolumeSource, Pod, PodSpec,
    PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::info;

pub const DEPLOYMENT_APP_LABEL: &str = "blob-volume-tester";

/// Deployment with one replica mounting one claim
pub struct TestDeployment {
    ctx: TestContext,
    deployment: Deployment,
    created: Option<Deployment>,
    pod_name: Option<String>,
}

impl TestDeployment {
    pub fn new(
        ctx: TestContext,
        cmd: &str,
        pvc: &PersistentVolumeClaim,
        volume_name: &str,
        mount_path: &str,
        read_only: bool,
    ) -> Self {
        let labels = app_labels();

        let mut node_selector = BTreeMap::new();
        node_selector.insert("kubernetes.io/os".to_string(), "linux".to_string());

        let container = Container {
            name: super::pod::CONTAINER_NAME.to_string(),
            image: Some(ctx.config.image.clone()),
            command: Some(vec!["/bin/sh".to_string()]),
            args: Some(vec!["-c".to_string(), cmd.to_string()]),
            volume_mounts: Some(vec![VolumeMount {
                name: volume_name.to_string(),
                mount_path: mount_path.to_string(),
                read_only: Some(read_only),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let deployment = Deployment {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", DEPLOYMENT_APP_LABEL)),
                namespace: Some(ctx.namespace.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        node_selector: Some(node_selector),
                        containers: vec![container],
                        restart_policy: Some("Always".to_string()),
                        volumes: Some(vec![Volume {
                            name: volume_name.to_string(),
                            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                                claim_name: pvc.metadata.name.clone().unwrap_or_default(),
                                read_only: None,
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        Self {
            ctx,
            deployment,
            created: None,
            pod_name: None,
        }
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub async fn create(&mut self) -> Result<Deployment> {
        info!("Creating deployment in {}", self.ctx.namespace);
        let created = self
            .ctx
            .cluster
            .create_deployment(&self.ctx.namespace, &self.deployment)
            .await?;
        info!(
            "Created deployment {}",
            created.metadata.name.as_deref().unwrap_or_default()
        );
        self.created = Some(created.clone());
        Ok(created)
    }

    pub fn name(&self) -> Result<&str> {
        self.created
            .as_ref()
            .and_then(|d| d.metadata.name.as_deref())
            .ok_or_else(|| not_created("Deployment"))
    }

    /// Current replica pod, known after `wait_for_pod_ready`
    pub fn pod_name(&self) -> Result<&str> {
        self.pod_name.as_deref().ok_or_else(|| not_created("Pod"))
    }

    pub fn cleanup_action(&self) -> Result<CleanupAction> {
        Ok(CleanupAction::DeleteDeployment {
            namespace: self.ctx.namespace.clone(),
            name: self.name()?.to_string(),
        })
    }

    /// Wait for a replica pod other than `exclude` that is running, ready
    /// and not being deleted
    async fn wait_for_replica(&self, exclude: Option<String>) -> Result<String> {
        let deployment = self.name()?.to_string();
        let namespace = self.ctx.namespace.clone();
        let cluster = self.ctx.cluster.clone();
        let selector = format!("app={}", DEPLOYMENT_APP_LABEL);
        let condition = format!("ready pod of deployment {}", deployment);
        info!("Waiting for a ready pod of deployment {}/{}", namespace, deployment);

        self.ctx
            .poll_until(&condition, self.ctx.config.timeouts.pod_start(), || {
                let cluster = cluster.clone();
                let (namespace, selector, exclude) =
                    (namespace.clone(), selector.clone(), exclude.clone());
                async move {
                    let pods = cluster.list_pods(&namespace, &selector).await?;
                    let ready = pods.iter().find(|pod| {
                        pod.metadata.name != exclude
                            && pod.metadata.deletion_timestamp.is_none()
                            && is_pod_ready(pod)
                    });
                    match ready.and_then(|pod| pod.metadata.name.clone()) {
                        Some(name) => Ok(Probe::Ready(name)),
                        None => Ok(Probe::Pending(format!("{} pods, none ready", pods.len()))),
                    }
                }
            })
            .await
    }

    pub async fn wait_for_pod_ready(&mut self) -> Result<()> {
        let pod = self.wait_for_replica(None).await?;
        info!("Deployment pod {} is ready", pod);
        self.pod_name = Some(pod);
        Ok(())
    }

    /// Run `command` in the current pod until its stdout equals `expected`
    pub async fn exec(&self, command: &[String], expected: &str) -> Result<()> {
        let pod = self.pod_name()?.to_string();
        let namespace = self.ctx.namespace.clone();
        let cluster = self.ctx.cluster.clone();
        let condition = format!("output of {:?} in pod {}", command, pod);
        info!("Executing {:?} in pod {}/{}", command, namespace, pod);

        let result = self
            .ctx
            .poll_until(&condition, self.ctx.config.timeouts.pod_start(), || {
                let cluster = cluster.clone();
                let (namespace, pod) = (namespace.clone(), pod.clone());
                async move {
                    let output = cluster.exec(&namespace, &pod, command).await?;
                    if output.stdout == expected {
                        Ok(Probe::Ready(()))
                    } else {
                        Ok(Probe::Pending(output.stdout))
                    }
                }
            })
            .await;

        match result {
            Err(Error::Timeout { last_observed, .. }) => Err(Error::ExecOutputMismatch {
                pod,
                expected: expected.to_string(),
                actual: last_observed,
            }),
            other => other,
        }
    }

    /// Delete the current pod and wait for the controller's replacement
    pub async fn delete_pod_and_wait(&mut self) -> Result<()> {
        let old = self.pod_name()?.to_string();
        info!("Deleting pod {}/{}", self.ctx.namespace, old);
        self.ctx.cluster.delete_pod(&self.ctx.namespace, &old).await?;

        let replacement = self.wait_for_replica(Some(old)).await?;
        info!("Deployment replaced its pod with {}", replacement);
        self.pod_name = Some(replacement);
        Ok(())
    }
}

fn app_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), DEPLOYMENT_APP_LABEL.to_string());
    labels
}

fn is_pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    status.phase.as_deref() == Some("Running")
        && status
            .conditions
            .as_ref()
            .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
            .unwrap_or(false)
}
