//! PersistentVolumeClaim and pre-provisioned PersistentVolume wrappers

use super::cleanup::{delete_claim, wait_for_volume_deleted};
use super::storage_class::not_created;
use super::{CleanupAction, Probe, TestContext};
use crate::domain::ports::BackendVolumeProbe;
use crate::domain::quantity::{format_quantity, parse_quantity, quantities_equal};
use crate::domain::specs::{AccessMode, DataSource, ReclaimPolicy, VolumeMode};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{
    PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    TypedLocalObjectReference, VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::info;

/// Kind used when a claim is cloned from another claim
pub const VOLUME_PVC_KIND: &str = "PersistentVolumeClaim";

/// Kind used when a claim is restored from a snapshot
pub const VOLUME_SNAPSHOT_KIND: &str = "VolumeSnapshot";

const SNAPSHOT_API_GROUP: &str = "snapshot.storage.k8s.io";

// =============================================================================
// Claim
// =============================================================================

/// A claim plus the volume it ends up bound to
pub struct TestPersistentVolumeClaim {
    ctx: TestContext,
    claim_size: String,
    volume_mode: VolumeMode,
    storage_class: Option<StorageClass>,
    storage_class_name: Option<String>,
    data_source: Option<DataSource>,
    access_modes: Vec<AccessMode>,
    persistent_volume_claim: Option<PersistentVolumeClaim>,
    persistent_volume: Option<PersistentVolume>,
}

impl TestPersistentVolumeClaim {
    /// A claim against `storage_class`, or against no class at all so it
    /// binds to a pre-created volume
    pub fn new(
        ctx: TestContext,
        claim_size: impl Into<String>,
        volume_mode: VolumeMode,
        storage_class: Option<&StorageClass>,
    ) -> Self {
        Self {
            ctx,
            claim_size: claim_size.into(),
            volume_mode,
            storage_class: storage_class.cloned(),
            storage_class_name: None,
            data_source: None,
            access_modes: vec![AccessMode::ReadWriteOnce],
            persistent_volume_claim: None,
            persistent_volume: None,
        }
    }

    /// Reference a class that exists outside the scenario by name. The bound
    /// volume is then not checked against the class's settings.
    pub fn with_storage_class_name(mut self, name: impl Into<String>) -> Self {
        self.storage_class_name = Some(name.into());
        self
    }

    pub fn with_data_source(mut self, data_source: DataSource) -> Self {
        self.data_source = Some(data_source);
        self
    }

    /// Replace the default single-writer mode; an empty list keeps it
    pub fn with_access_modes(mut self, access_modes: &[AccessMode]) -> Self {
        if !access_modes.is_empty() {
            self.access_modes = access_modes.to_vec();
        }
        self
    }

    fn build(&self) -> PersistentVolumeClaim {
        let mut requests = BTreeMap::new();
        requests.insert("storage".to_string(), Quantity(self.claim_size.clone()));

        let storage_class_name = self
            .storage_class_name
            .clone()
            .or_else(|| self.storage_class.as_ref().and_then(|sc| sc.metadata.name.clone()))
            .unwrap_or_default();

        let data_source = self.data_source.as_ref().map(|ds| TypedLocalObjectReference {
            api_group: (ds.kind == VOLUME_SNAPSHOT_KIND).then(|| SNAPSHOT_API_GROUP.to_string()),
            kind: ds.kind.clone(),
            name: ds.name.clone(),
        });

        PersistentVolumeClaim {
            metadata: ObjectMeta {
                generate_name: Some("pvc-".to_string()),
                namespace: Some(self.ctx.namespace.clone()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(self.access_modes.iter().map(|m| m.to_string()).collect()),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                storage_class_name: Some(storage_class_name),
                volume_mode: Some(self.volume_mode.as_str().to_string()),
                data_source,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub async fn create(&mut self) -> Result<PersistentVolumeClaim> {
        let pvc = self.build();
        info!(
            "Creating PersistentVolumeClaim in {} ({}, class {:?})",
            self.ctx.namespace,
            self.claim_size,
            pvc.spec.as_ref().and_then(|s| s.storage_class_name.as_deref())
        );
        let created = self
            .ctx
            .cluster
            .create_persistent_volume_claim(&self.ctx.namespace, &pvc)
            .await?;
        self.persistent_volume_claim = Some(created.clone());
        Ok(created)
    }

    pub fn name(&self) -> Result<&str> {
        self.persistent_volume_claim
            .as_ref()
            .and_then(|pvc| pvc.metadata.name.as_deref())
            .ok_or_else(|| not_created("PersistentVolumeClaim"))
    }

    pub fn persistent_volume_claim(&self) -> Option<&PersistentVolumeClaim> {
        self.persistent_volume_claim.as_ref()
    }

    /// The bound volume, known once `wait_for_bound` returned
    pub fn persistent_volume(&self) -> Option<&PersistentVolume> {
        self.persistent_volume.as_ref()
    }

    /// CSI volume handle of the bound volume
    pub fn volume_handle(&self) -> Option<&str> {
        self.persistent_volume
            .as_ref()
            .and_then(|pv| pv.spec.as_ref())
            .and_then(|s| s.csi.as_ref())
            .map(|csi| csi.volume_handle.as_str())
    }

    pub fn reclaim_policy(&self) -> Option<ReclaimPolicy> {
        self.persistent_volume
            .as_ref()
            .and_then(|pv| pv.spec.as_ref())
            .and_then(|s| s.persistent_volume_reclaim_policy.as_deref())
            .and_then(ReclaimPolicy::from_k8s)
    }

    pub fn cleanup_action(&self) -> Result<CleanupAction> {
        Ok(CleanupAction::DeletePersistentVolumeClaim {
            namespace: self.ctx.namespace.clone(),
            name: self.name()?.to_string(),
        })
    }

    /// Wait until the claim reports Bound, then fetch its volume
    pub async fn wait_for_bound(&mut self) -> Result<PersistentVolumeClaim> {
        let name = self.name()?.to_string();
        let namespace = self.ctx.namespace.clone();
        let cluster = self.ctx.cluster.clone();
        info!("Waiting for PersistentVolumeClaim {}/{} to be bound", namespace, name);

        let condition = format!("PersistentVolumeClaim {} bound", name);
        let bound = self
            .ctx
            .poll_until(&condition, self.ctx.config.timeouts.claim_bound(), || {
                let cluster = cluster.clone();
                let (namespace, name) = (namespace.clone(), name.clone());
                async move {
                    let pvc = cluster
                        .get_persistent_volume_claim(&namespace, &name)
                        .await?
                        .ok_or_else(|| Error::ResourceNotFound {
                            kind: "PersistentVolumeClaim".into(),
                            name: name.clone(),
                        })?;
                    let phase = claim_phase(&pvc);
                    if phase == "Bound" {
                        Ok(Probe::Ready(pvc))
                    } else {
                        Ok(Probe::Pending(phase))
                    }
                }
            })
            .await?;

        let volume_name = bound
            .spec
            .as_ref()
            .and_then(|s| s.volume_name.clone())
            .ok_or_else(|| Error::ValidationFailed {
                kind: "PersistentVolumeClaim".into(),
                name: name.clone(),
                reason: "bound claim has no volume name".into(),
            })?;
        let pv = self
            .ctx
            .cluster
            .get_persistent_volume(&volume_name)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "PersistentVolume".into(),
                name: volume_name.clone(),
            })?;

        self.persistent_volume_claim = Some(bound.clone());
        self.persistent_volume = Some(pv);
        Ok(bound)
    }

    /// Check the bound volume matches what was requested: size on claim and
    /// volume, claim reference, and the class's reclaim policy and mount options
    pub fn validate_provisioned_persistent_volume(&self) -> Result<()> {
        let pvc = self
            .persistent_volume_claim
            .as_ref()
            .ok_or_else(|| not_created("PersistentVolumeClaim"))?;
        let pv = self
            .persistent_volume
            .as_ref()
            .ok_or_else(|| not_created("PersistentVolume"))?;
        let pvc_name = self.name()?.to_string();
        let pv_name = pv.metadata.name.clone().unwrap_or_default();
        let invalid = |reason: String| Error::ValidationFailed {
            kind: "PersistentVolume".into(),
            name: pv_name.clone(),
            reason,
        };

        info!("Validating PersistentVolume {} bound to {}", pv_name, pvc_name);

        let claim_capacity = pvc
            .status
            .as_ref()
            .and_then(|s| s.capacity.as_ref())
            .and_then(|c| c.get("storage"))
            .ok_or_else(|| invalid("claim status has no capacity".into()))?;
        if !quantities_equal(&claim_capacity.0, &self.claim_size)? {
            return Err(invalid(format!(
                "claim capacity {} does not match requested {}",
                claim_capacity.0, self.claim_size
            )));
        }

        let spec = pv.spec.as_ref().ok_or_else(|| invalid("volume has no spec".into()))?;
        let volume_capacity = spec
            .capacity
            .as_ref()
            .and_then(|c| c.get("storage"))
            .ok_or_else(|| invalid("volume has no capacity".into()))?;
        if !quantities_equal(&volume_capacity.0, &self.claim_size)? {
            return Err(invalid(format!(
                "volume capacity {} does not match requested {}",
                volume_capacity.0, self.claim_size
            )));
        }

        let claim_ref = spec
            .claim_ref
            .as_ref()
            .ok_or_else(|| invalid("volume has no claim reference".into()))?;
        if claim_ref.name.as_deref() != Some(pvc_name.as_str())
            || claim_ref.namespace.as_deref() != Some(self.ctx.namespace.as_str())
        {
            return Err(invalid(format!(
                "volume claimed by {:?}/{:?}, expected {}/{}",
                claim_ref.namespace, claim_ref.name, self.ctx.namespace, pvc_name
            )));
        }

        if let Some(sc) = &self.storage_class {
            if spec.persistent_volume_reclaim_policy != sc.reclaim_policy {
                return Err(invalid(format!(
                    "reclaim policy {:?} does not match class {:?}",
                    spec.persistent_volume_reclaim_policy, sc.reclaim_policy
                )));
            }
            let volume_options = spec.mount_options.clone().unwrap_or_default();
            let class_options = sc.mount_options.clone().unwrap_or_default();
            if volume_options != class_options {
                return Err(invalid(format!(
                    "mount options {:?} do not match class {:?}",
                    volume_options, class_options
                )));
            }
        }

        Ok(())
    }

    /// Wait for the bound volume to reach a phase such as `Released`
    pub async fn wait_for_persistent_volume_phase(&self, phase: &str) -> Result<()> {
        let pv_name = self
            .persistent_volume
            .as_ref()
            .and_then(|pv| pv.metadata.name.clone())
            .ok_or_else(|| not_created("PersistentVolume"))?;
        let cluster = self.ctx.cluster.clone();
        let condition = format!("PersistentVolume {} phase {}", pv_name, phase);

        self.ctx
            .poll_until(&condition, self.ctx.config.timeouts.volume_delete(), || {
                let cluster = cluster.clone();
                let pv_name = pv_name.clone();
                let phase = phase.to_string();
                async move {
                    let pv = cluster.get_persistent_volume(&pv_name).await?.ok_or_else(|| {
                        Error::ResourceNotFound {
                            kind: "PersistentVolume".into(),
                            name: pv_name.clone(),
                        }
                    })?;
                    let current = pv.status.and_then(|s| s.phase).unwrap_or_default();
                    if current == phase {
                        Ok(Probe::Ready(()))
                    } else {
                        Ok(Probe::Pending(current))
                    }
                }
            })
            .await
    }

    /// Delete the claim now; waits for a Delete-policy volume to disappear
    pub async fn delete(&self) -> Result<()> {
        delete_claim(
            self.ctx.cluster.as_ref(),
            &self.ctx.config,
            &self.ctx.namespace,
            self.name()?,
        )
        .await
    }

    /// Delete the bound volume object and wait until it is gone
    pub async fn delete_bound_persistent_volume(&self) -> Result<()> {
        let pv_name = self
            .persistent_volume
            .as_ref()
            .and_then(|pv| pv.metadata.name.as_deref())
            .ok_or_else(|| not_created("PersistentVolume"))?;
        info!("Deleting PersistentVolume {}", pv_name);
        self.ctx.cluster.delete_persistent_volume(pv_name).await?;
        wait_for_volume_deleted(self.ctx.cluster.as_ref(), &self.ctx.config, pv_name).await
    }

    /// Remove the backend volume a Retain-policy volume left behind
    pub async fn delete_backing_volume(&self, backend: &dyn BackendVolumeProbe) -> Result<()> {
        let handle = self
            .volume_handle()
            .ok_or_else(|| not_created("PersistentVolume"))?;
        info!("Deleting backing volume {} from {}", handle, backend.backend_name());
        backend.delete_volume(handle).await
    }

    /// Request `delta` more bytes and return the new size string
    pub async fn expand(&mut self, delta: u64) -> Result<String> {
        let name = self.name()?.to_string();
        let current = self
            .persistent_volume_claim
            .as_ref()
            .and_then(|pvc| pvc.spec.as_ref())
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage"))
            .map(|q| q.0.clone())
            .unwrap_or_else(|| self.claim_size.clone());
        let new_size = format_quantity(parse_quantity(&current)? + delta);

        info!("Resizing PersistentVolumeClaim {} from {} to {}", name, current, new_size);
        let updated = self
            .ctx
            .cluster
            .resize_persistent_volume_claim(&self.ctx.namespace, &name, &new_size)
            .await?;
        self.persistent_volume_claim = Some(updated);
        Ok(new_size)
    }

    /// Wait until both the claim's request and the bound volume's capacity
    /// report `size`
    pub async fn wait_for_size(&self, size: &str) -> Result<()> {
        let name = self.name()?.to_string();
        let namespace = self.ctx.namespace.clone();
        let cluster = self.ctx.cluster.clone();
        let expected = parse_quantity(size)?;
        let condition = format!("PersistentVolumeClaim {} resized to {}", name, size);

        self.ctx
            .poll_until(&condition, self.ctx.config.timeouts.resize(), || {
                let cluster = cluster.clone();
                let (namespace, name) = (namespace.clone(), name.clone());
                async move {
                    let pvc = cluster
                        .get_persistent_volume_claim(&namespace, &name)
                        .await?
                        .ok_or_else(|| Error::ResourceNotFound {
                            kind: "PersistentVolumeClaim".into(),
                            name: name.clone(),
                        })?;
                    let spec = pvc.spec.unwrap_or_default();
                    let requested = spec
                        .resources
                        .and_then(|r| r.requests)
                        .and_then(|r| r.get("storage").map(|q| q.0.clone()))
                        .unwrap_or_default();
                    if parse_quantity(&requested)? != expected {
                        return Ok(Probe::Pending(format!("claim requests {}", requested)));
                    }

                    let volume_name = spec.volume_name.unwrap_or_default();
                    let capacity = cluster
                        .get_persistent_volume(&volume_name)
                        .await?
                        .and_then(|pv| pv.spec)
                        .and_then(|s| s.capacity)
                        .and_then(|c| c.get("storage").map(|q| q.0.clone()))
                        .unwrap_or_default();
                    if !capacity.is_empty() && parse_quantity(&capacity)? == expected {
                        Ok(Probe::Ready(()))
                    } else {
                        Ok(Probe::Pending(format!("volume capacity {:?}", capacity)))
                    }
                }
            })
            .await
    }
}

fn claim_phase(pvc: &PersistentVolumeClaim) -> String {
    pvc.status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| "Pending".to_string())
}

// =============================================================================
// Pre-provisioned Volume
// =============================================================================

/// A PersistentVolume created by hand for an existing backend volume
pub struct TestPreProvisionedPersistentVolume {
    ctx: TestContext,
    persistent_volume: PersistentVolume,
    created: Option<PersistentVolume>,
}

impl TestPreProvisionedPersistentVolume {
    pub fn new(ctx: TestContext, persistent_volume: PersistentVolume) -> Self {
        Self {
            ctx,
            persistent_volume,
            created: None,
        }
    }

    pub async fn create(&mut self) -> Result<PersistentVolume> {
        info!("Creating pre-provisioned PersistentVolume");
        let created = self
            .ctx
            .cluster
            .create_persistent_volume(&self.persistent_volume)
            .await?;
        self.created = Some(created.clone());
        Ok(created)
    }

    pub fn name(&self) -> Result<&str> {
        self.created
            .as_ref()
            .and_then(|pv| pv.metadata.name.as_deref())
            .ok_or_else(|| not_created("PersistentVolume"))
    }

    pub fn cleanup_action(&self) -> Result<CleanupAction> {
        Ok(CleanupAction::DeletePersistentVolume {
            name: self.name()?.to_string(),
        })
    }
}
