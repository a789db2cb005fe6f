//! In-Memory Control Plane
//!
//! Test fixture: a small stand-in for the API server, the external
//! provisioner and the kubelet, good enough to drive every scenario in unit
//! tests. Compiled for tests only. All state changes happen synchronously
//! inside the API call, so any polled condition is either true on the first
//! probe or never.
//!
//! What is simulated:
//! - `generateName` resolution
//! - dynamic provisioning on claim creation (`Immediate`) or when a pod
//!   first references the claim (`WaitForFirstConsumer`); class-less claims
//!   bind to an `Available` pre-created volume
//! - reclaim policy on claim deletion, with a backend volume per handle
//! - pod execution of the simple shell commands the scenarios use
//! - single-replica deployments that replace deleted pods

use crate::domain::ports::{BackendVolumeProbe, ClusterApi, ExecOutput};
use crate::domain::quantity::parse_quantity;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, Event, Namespace, ObjectReference, PersistentVolume,
    PersistentVolumeClaim, PersistentVolumeClaimStatus, PersistentVolumeSpec,
    PersistentVolumeStatus, Pod, PodCondition, PodStatus,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use kube::api::ObjectMeta;
use kube::error::ErrorResponse;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

const DEFAULT_NODE: &str = "memory-node-1";
const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";
const MEMORY_RESOURCE_GROUP: &str = "memory-rg";
const MEMORY_ACCOUNT: &str = "memoryaccount";

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

// =============================================================================
// State
// =============================================================================

#[derive(Default)]
struct State {
    counter: u64,
    namespaces: BTreeSet<String>,
    storage_classes: BTreeMap<String, StorageClass>,
    volumes: BTreeMap<String, PersistentVolume>,
    claims: BTreeMap<Key, PersistentVolumeClaim>,
    pods: BTreeMap<Key, Pod>,
    deployments: BTreeMap<Key, Deployment>,
    events: Vec<Event>,
    logs: BTreeMap<Key, String>,
    /// File contents keyed by (volume key, path relative to the mount)
    files: BTreeMap<Key, String>,
    backend_volumes: BTreeSet<String>,
    deletions: Vec<String>,
    fail_deletes: BTreeSet<String>,
    fail_creates: BTreeSet<String>,
}

/// A mount visible inside a pod
struct Mount {
    path: String,
    volume_key: String,
    read_only: bool,
}

/// Outcome of running a pod command
struct RunResult {
    phase: &'static str,
    logs: String,
}

impl State {
    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn resolve_name(&mut self, meta: &mut ObjectMeta) -> String {
        let n = self.next();
        if meta.name.as_deref().map_or(true, str::is_empty) {
            let prefix = meta.generate_name.clone().unwrap_or_default();
            meta.name = Some(format!("{}{:05}", prefix, n));
        }
        meta.uid = Some(format!("memory-uid-{}", n));
        meta.creation_timestamp = Some(Time(chrono::Utc::now()));
        meta.name.clone().unwrap_or_default()
    }

    fn check_create(&self, kind: &str) -> Result<()> {
        if self.fail_creates.contains(kind) {
            return Err(injected_failure(kind, "create"));
        }
        Ok(())
    }

    fn check_delete(&self, kind: &str) -> Result<()> {
        if self.fail_deletes.contains(kind) {
            return Err(injected_failure(kind, "delete"));
        }
        Ok(())
    }

    fn record(&mut self, entry: String) {
        debug!("in-memory cluster deleted {}", entry);
        self.deletions.push(entry);
    }

    // -------------------------------------------------------------------------
    // Provisioning
    // -------------------------------------------------------------------------

    fn requested_size(pvc: &PersistentVolumeClaim) -> String {
        pvc.spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage"))
            .map(|q| q.0.clone())
            .unwrap_or_default()
    }

    fn class_of(&self, pvc: &PersistentVolumeClaim) -> Option<StorageClass> {
        let name = pvc.spec.as_ref()?.storage_class_name.as_deref()?;
        self.storage_classes.get(name).cloned()
    }

    fn is_class_less(pvc: &PersistentVolumeClaim) -> bool {
        pvc.spec
            .as_ref()
            .and_then(|s| s.storage_class_name.as_deref())
            .map_or(true, str::is_empty)
    }

    fn is_bound(pvc: &PersistentVolumeClaim) -> bool {
        pvc.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Bound")
    }

    /// Bind a claim if its class or a matching volume allows it now
    fn try_bind(&mut self, claim_key: &Key, consumer_present: bool) {
        let Some(pvc) = self.claims.get(claim_key).cloned() else {
            return;
        };
        if Self::is_bound(&pvc) {
            return;
        }

        if Self::is_class_less(&pvc) {
            self.bind_to_available(claim_key, &pvc);
            return;
        }
        let Some(class) = self.class_of(&pvc) else {
            return;
        };
        let deferred = class.volume_binding_mode.as_deref() == Some("WaitForFirstConsumer");
        if deferred && !consumer_present {
            return;
        }
        self.provision(claim_key, &pvc, &class);
    }

    fn provision(&mut self, claim_key: &Key, pvc: &PersistentVolumeClaim, class: &StorageClass) {
        let n = self.next();
        let pv_name = format!("pvc-{:05}", n);
        let handle = format!("{}#{}#{}#", MEMORY_RESOURCE_GROUP, MEMORY_ACCOUNT, pv_name);
        let size = Self::requested_size(pvc);
        let spec = pvc.spec.clone().unwrap_or_default();

        let mut capacity = BTreeMap::new();
        capacity.insert("storage".to_string(), Quantity(size));

        let pv = PersistentVolume {
            metadata: ObjectMeta {
                name: Some(pv_name.clone()),
                uid: Some(format!("memory-uid-{}", n)),
                creation_timestamp: Some(Time(chrono::Utc::now())),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                access_modes: spec.access_modes.clone(),
                capacity: Some(capacity),
                persistent_volume_reclaim_policy: Some(
                    class.reclaim_policy.clone().unwrap_or_else(|| "Delete".to_string()),
                ),
                mount_options: class.mount_options.clone(),
                storage_class_name: class.metadata.name.clone(),
                volume_mode: spec.volume_mode.clone(),
                claim_ref: Some(claim_reference(claim_key)),
                csi: Some(CSIPersistentVolumeSource {
                    driver: class.provisioner.clone(),
                    volume_handle: handle.clone(),
                    volume_attributes: class.parameters.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: Some(PersistentVolumeStatus {
                phase: Some("Bound".to_string()),
                ..Default::default()
            }),
        };

        debug!("in-memory provisioner created {} for {:?}", pv_name, claim_key);
        self.backend_volumes.insert(handle);
        self.volumes.insert(pv_name.clone(), pv.clone());
        self.mark_claim_bound(claim_key, &pv);
    }

    fn bind_to_available(&mut self, claim_key: &Key, pvc: &PersistentVolumeClaim) {
        let wanted = parse_quantity(&Self::requested_size(pvc)).unwrap_or(0);
        let candidate = self.volumes.iter().find_map(|(name, pv)| {
            let available = pv.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Available");
            let spec = pv.spec.as_ref()?;
            let unclaimed = spec.claim_ref.is_none();
            let capacity = spec
                .capacity
                .as_ref()
                .and_then(|c| c.get("storage"))
                .and_then(|q| parse_quantity(&q.0).ok())
                .unwrap_or(0);
            (available && unclaimed && capacity >= wanted).then(|| name.clone())
        });
        let Some(pv_name) = candidate else {
            return;
        };
        let Some(pv) = self.volumes.get_mut(&pv_name) else {
            return;
        };
        if let Some(spec) = pv.spec.as_mut() {
            spec.claim_ref = Some(claim_reference(claim_key));
        }
        pv.status = Some(PersistentVolumeStatus {
            phase: Some("Bound".to_string()),
            ..Default::default()
        });
        let pv = pv.clone();
        self.mark_claim_bound(claim_key, &pv);
    }

    fn mark_claim_bound(&mut self, claim_key: &Key, pv: &PersistentVolume) {
        let Some(pvc) = self.claims.get_mut(claim_key) else {
            return;
        };
        let pv_spec = pv.spec.clone().unwrap_or_default();
        if let Some(spec) = pvc.spec.as_mut() {
            spec.volume_name = pv.metadata.name.clone();
        }
        pvc.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".to_string()),
            access_modes: pv_spec.access_modes.clone(),
            capacity: pv_spec.capacity.clone(),
            ..Default::default()
        });
    }

    fn remove_claim(&mut self, claim_key: &Key) {
        let Some(pvc) = self.claims.remove(claim_key) else {
            return;
        };
        let Some(pv_name) = pvc.spec.and_then(|s| s.volume_name) else {
            return;
        };
        let Some(spec) = self.volumes.get(&pv_name).and_then(|pv| pv.spec.clone()) else {
            return;
        };

        if spec.persistent_volume_reclaim_policy.as_deref() == Some("Delete") {
            if let Some(csi) = spec.csi {
                self.backend_volumes.remove(&csi.volume_handle);
            }
            self.volumes.remove(&pv_name);
            self.files.retain(|(volume, _), _| volume != &pv_name);
        } else if let Some(pv) = self.volumes.get_mut(&pv_name) {
            pv.status = Some(PersistentVolumeStatus {
                phase: Some("Released".to_string()),
                ..Default::default()
            });
        }
    }

    // -------------------------------------------------------------------------
    // Pods
    // -------------------------------------------------------------------------

    fn mounts_of(&self, namespace: &str, pod: &Pod) -> Vec<Mount> {
        let Some(spec) = pod.spec.as_ref() else {
            return Vec::new();
        };
        let volumes = spec.volumes.clone().unwrap_or_default();
        let mut mounts = Vec::new();
        for container in &spec.containers {
            for vm in container.volume_mounts.iter().flatten() {
                let Some(volume) = volumes.iter().find(|v| v.name == vm.name) else {
                    continue;
                };
                let (volume_key, source_read_only) = if let Some(claim) = &volume.persistent_volume_claim {
                    let pv = self
                        .claims
                        .get(&key(namespace, &claim.claim_name))
                        .and_then(|pvc| pvc.spec.as_ref())
                        .and_then(|s| s.volume_name.clone())
                        .unwrap_or_default();
                    (pv, claim.read_only.unwrap_or(false))
                } else if let Some(csi) = &volume.csi {
                    let container_name = csi
                        .volume_attributes
                        .as_ref()
                        .and_then(|a| a.get("containerName"))
                        .cloned()
                        .unwrap_or_default();
                    (format!("inline/{}", container_name), csi.read_only.unwrap_or(false))
                } else {
                    (format!("emptydir/{}", vm.name), false)
                };
                mounts.push(Mount {
                    path: vm.mount_path.trim_end_matches('/').to_string(),
                    volume_key,
                    read_only: source_read_only || vm.read_only.unwrap_or(false),
                });
            }
        }
        mounts
    }

    /// Mount options the kubelet would hand to the driver for this pod
    fn mount_options_of(&self, namespace: &str, pod: &Pod) -> Vec<String> {
        let volumes = pod
            .spec
            .as_ref()
            .and_then(|s| s.volumes.clone())
            .unwrap_or_default();
        let mut options = Vec::new();
        for volume in volumes {
            if let Some(claim) = volume.persistent_volume_claim {
                let pv = self
                    .claims
                    .get(&key(namespace, &claim.claim_name))
                    .and_then(|pvc| pvc.spec.as_ref())
                    .and_then(|s| s.volume_name.as_ref())
                    .and_then(|name| self.volumes.get(name));
                if let Some(opts) = pv.and_then(|pv| pv.spec.as_ref()).and_then(|s| s.mount_options.clone()) {
                    options.extend(opts);
                }
            } else if let Some(csi) = volume.csi {
                if let Some(opts) = csi.volume_attributes.and_then(|a| a.get("mountOptions").cloned()) {
                    options.push(opts);
                }
            }
        }
        options
    }

    fn unbound_claims_of(&self, namespace: &str, pod: &Pod) -> Vec<String> {
        pod.spec
            .as_ref()
            .and_then(|s| s.volumes.as_ref())
            .into_iter()
            .flatten()
            .filter_map(|v| v.persistent_volume_claim.as_ref())
            .map(|c| c.claim_name.clone())
            .filter(|name| {
                self.claims
                    .get(&key(namespace, name))
                    .map_or(true, |pvc| !Self::is_bound(pvc))
            })
            .collect()
    }

    fn add_event(&mut self, namespace: &str, pod: &str, reason: &str, message: String) {
        let n = self.next();
        self.events.push(Event {
            metadata: ObjectMeta {
                name: Some(format!("{}.{:05}", pod, n)),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                kind: Some("Pod".to_string()),
                name: Some(pod.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            message: Some(message),
            type_: Some("Warning".to_string()),
            ..Default::default()
        });
    }

    /// Schedule, mount and run a freshly created pod
    fn start_pod(&mut self, namespace: &str, mut pod: Pod) -> Pod {
        let name = pod.metadata.name.clone().unwrap_or_default();

        let claims: Vec<String> = pod
            .spec
            .as_ref()
            .and_then(|s| s.volumes.as_ref())
            .into_iter()
            .flatten()
            .filter_map(|v| v.persistent_volume_claim.as_ref())
            .map(|c| c.claim_name.clone())
            .collect();
        for claim in &claims {
            self.try_bind(&key(namespace, claim), true);
        }

        let node = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_selector.as_ref())
            .and_then(|sel| sel.get(HOSTNAME_LABEL).cloned())
            .unwrap_or_else(|| DEFAULT_NODE.to_string());

        let unbound = self.unbound_claims_of(namespace, &pod);
        if !unbound.is_empty() {
            pod.status = Some(pending_status());
            return pod;
        }
        if let Some(spec) = pod.spec.as_mut() {
            spec.node_name = Some(node);
        }

        let invalid: Vec<String> = self
            .mount_options_of(namespace, &pod)
            .into_iter()
            .filter(|opt| !opt.trim_start().starts_with('-'))
            .collect();
        if !invalid.is_empty() {
            self.add_event(
                namespace,
                &name,
                "FailedMount",
                format!(
                    "MountVolume.MountDevice failed: invalid mount options {:?}",
                    invalid
                ),
            );
            pod.status = Some(pending_status());
            return pod;
        }

        let cmd = pod
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .and_then(|c| c.args.as_ref())
            .and_then(|args| args.last().cloned())
            .unwrap_or_default();
        let mounts = self.mounts_of(namespace, &pod);
        let result = self.run_command(&cmd, &mounts);

        self.logs.insert(key(namespace, &name), result.logs);
        pod.status = Some(PodStatus {
            phase: Some(result.phase.to_string()),
            conditions: (result.phase == "Running").then(|| {
                vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        });
        pod
    }

    fn run_command(&mut self, cmd: &str, mounts: &[Mount]) -> RunResult {
        let (prefix, long_running) = match cmd.find("while true") {
            Some(idx) => (&cmd[..idx], true),
            None => (cmd, false),
        };

        let mut logs = String::new();
        for segment in prefix.split("&&").flat_map(|s| s.split(';')) {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            match self.run_step(segment, mounts) {
                Ok(out) => logs.push_str(&out),
                Err(message) => {
                    logs.push_str(&message);
                    logs.push('\n');
                    return RunResult {
                        phase: "Failed",
                        logs,
                    };
                }
            }
        }

        RunResult {
            phase: if long_running { "Running" } else { "Succeeded" },
            logs,
        }
    }

    fn locate(&self, path: &str, mounts: &[Mount]) -> (Key, bool) {
        let mount = mounts
            .iter()
            .filter(|m| path == m.path || path.starts_with(&format!("{}/", m.path)))
            .max_by_key(|m| m.path.len());
        match mount {
            Some(m) => (
                (m.volume_key.clone(), path[m.path.len()..].trim_start_matches('/').to_string()),
                m.read_only,
            ),
            None => (("rootfs".to_string(), path.to_string()), false),
        }
    }

    /// Run one simple shell command; returns its stdout or an error line
    fn run_step(&mut self, segment: &str, mounts: &[Mount]) -> std::result::Result<String, String> {
        if let Some(rest) = segment.strip_prefix("echo ") {
            let (text, target) = match rest.find('>') {
                Some(idx) => (&rest[..idx], Some(&rest[idx..])),
                None => (rest, None),
            };
            let text = unquote(text.trim());
            let Some(target) = target else {
                return Ok(format!("{}\n", text));
            };
            let append = target.starts_with(">>");
            let path = target.trim_start_matches('>').trim();
            let (file, read_only) = self.locate(path, mounts);
            if read_only {
                return Err(format!("sh: can't create {}: Read-only file system", path));
            }
            let entry = self.files.entry(file).or_default();
            if !append {
                entry.clear();
            }
            entry.push_str(&text);
            entry.push('\n');
            return Ok(String::new());
        }

        if let Some(path) = segment.strip_prefix("touch ") {
            let path = path.trim();
            let (file, read_only) = self.locate(path, mounts);
            if read_only {
                return Err(format!("touch: {}: Read-only file system", path));
            }
            self.files.entry(file).or_default();
            return Ok(String::new());
        }

        if let Some(rest) = segment.strip_prefix("grep ") {
            let (pattern, path) = split_quoted(rest.trim());
            let (file, _) = self.locate(path.trim(), mounts);
            let content = self
                .files
                .get(&file)
                .ok_or_else(|| format!("grep: {}: No such file or directory", path.trim()))?;
            let matched: Vec<&str> = content.lines().filter(|l| l.contains(&pattern)).collect();
            if matched.is_empty() {
                return Err(String::new());
            }
            return Ok(matched.iter().map(|l| format!("{}\n", l)).collect());
        }

        if let Some(path) = segment.strip_prefix("cat ") {
            let path = path.trim();
            let (file, _) = self.locate(path, mounts);
            return self
                .files
                .get(&file)
                .cloned()
                .ok_or_else(|| format!("cat: can't open '{}': No such file or directory", path));
        }

        if segment == "false" {
            return Err(String::new());
        }
        Ok(String::new())
    }

    fn create_replica(&mut self, namespace: &str, deployment: &Deployment) -> Option<Pod> {
        let deploy_name = deployment.metadata.name.clone()?;
        let template = deployment.spec.as_ref()?.template.clone();
        let template_meta = template.metadata.unwrap_or_default();
        let mut pod = Pod {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", deploy_name)),
                namespace: Some(namespace.to_string()),
                labels: template_meta.labels,
                owner_references: Some(vec![OwnerReference {
                    api_version: "apps/v1".to_string(),
                    kind: "Deployment".to_string(),
                    name: deploy_name,
                    uid: deployment.metadata.uid.clone().unwrap_or_default(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            spec: template.spec,
            status: None,
        };
        let name = self.resolve_name(&mut pod.metadata);
        let pod = self.start_pod(namespace, pod);
        self.pods.insert(key(namespace, &name), pod.clone());
        Some(pod)
    }
}

fn claim_reference(claim_key: &Key) -> ObjectReference {
    ObjectReference {
        kind: Some("PersistentVolumeClaim".to_string()),
        namespace: Some(claim_key.0.clone()),
        name: Some(claim_key.1.clone()),
        ..Default::default()
    }
}

fn pending_status() -> PodStatus {
    PodStatus {
        phase: Some("Pending".to_string()),
        ..Default::default()
    }
}

fn unquote(text: &str) -> String {
    let t = text.trim();
    for q in ['\'', '"'] {
        if t.len() >= 2 && t.starts_with(q) && t.ends_with(q) {
            return t[1..t.len() - 1].to_string();
        }
    }
    t.to_string()
}

/// Split `'quoted arg' rest` into the unquoted first argument and the rest
fn split_quoted(text: &str) -> (String, &str) {
    for q in ['\'', '"'] {
        if let Some(body) = text.strip_prefix(q) {
            if let Some(end) = body.find(q) {
                return (body[..end].to_string(), &body[end + 1..]);
            }
        }
    }
    match text.split_once(' ') {
        Some((first, rest)) => (first.to_string(), rest),
        None => (text.to_string(), ""),
    }
}

fn injected_failure(kind: &str, verb: &str) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected failure: {} {}", verb, kind),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

fn matches_selector(pod: &Pod, selector: &str) -> bool {
    let labels = pod.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term),
        })
}

fn owner_deployment(pod: &Pod) -> Option<String> {
    pod.metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|o| o.kind == "Deployment")
        .map(|o| o.name.clone())
}

// =============================================================================
// In-Memory Cluster
// =============================================================================

/// Simulated cluster and storage backend
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every successful delete call, in order, as `Kind/namespace/name`
    pub fn deletions(&self) -> Vec<String> {
        self.state.lock().deletions.clone()
    }

    /// Make every delete of `kind` fail with a server error
    pub fn fail_deletes_of(&self, kind: &str) {
        self.state.lock().fail_deletes.insert(kind.to_string());
    }

    /// Make every create of `kind` fail with a server error
    pub fn fail_creates_of(&self, kind: &str) {
        self.state.lock().fail_creates.insert(kind.to_string());
    }

    /// Register a backend volume that exists outside the cluster
    pub fn add_backend_volume(&self, volume_id: &str) {
        self.state.lock().backend_volumes.insert(volume_id.to_string());
    }

    pub fn storage_class_count(&self) -> usize {
        self.state.lock().storage_classes.len()
    }

    pub fn claim_count(&self) -> usize {
        self.state.lock().claims.len()
    }

    pub fn pod_count(&self) -> usize {
        self.state.lock().pods.len()
    }

    pub fn volume_count(&self) -> usize {
        self.state.lock().volumes.len()
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn create_namespace(&self, generate_name: &str) -> Result<Namespace> {
        let mut state = self.state.lock();
        state.check_create("Namespace")?;
        let mut ns = Namespace {
            metadata: ObjectMeta {
                generate_name: Some(generate_name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let name = state.resolve_name(&mut ns.metadata);
        state.namespaces.insert(name);
        Ok(ns)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_delete("Namespace")?;
        state.namespaces.remove(name);
        state.pods.retain(|(ns, _), _| ns != name);
        state.deployments.retain(|(ns, _), _| ns != name);
        let claims: Vec<Key> = state.claims.keys().filter(|(ns, _)| ns == name).cloned().collect();
        for claim in claims {
            state.remove_claim(&claim);
        }
        state.record(format!("Namespace/{}", name));
        Ok(())
    }

    async fn create_storage_class(&self, storage_class: &StorageClass) -> Result<StorageClass> {
        let mut state = self.state.lock();
        state.check_create("StorageClass")?;
        let mut sc = storage_class.clone();
        let name = state.resolve_name(&mut sc.metadata);
        state.storage_classes.insert(name, sc.clone());
        Ok(sc)
    }

    async fn delete_storage_class(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_delete("StorageClass")?;
        state.storage_classes.remove(name);
        state.record(format!("StorageClass/{}", name));
        Ok(())
    }

    async fn create_persistent_volume(&self, pv: &PersistentVolume) -> Result<PersistentVolume> {
        let mut state = self.state.lock();
        state.check_create("PersistentVolume")?;
        let mut pv = pv.clone();
        // cluster-scoped
        pv.metadata.namespace = None;
        let name = state.resolve_name(&mut pv.metadata);
        pv.status = Some(PersistentVolumeStatus {
            phase: Some("Available".to_string()),
            ..Default::default()
        });
        state.volumes.insert(name, pv.clone());
        Ok(pv)
    }

    async fn get_persistent_volume(&self, name: &str) -> Result<Option<PersistentVolume>> {
        Ok(self.state.lock().volumes.get(name).cloned())
    }

    async fn delete_persistent_volume(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_delete("PersistentVolume")?;
        state.volumes.remove(name);
        state.record(format!("PersistentVolume/{}", name));
        Ok(())
    }

    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let mut state = self.state.lock();
        state.check_create("PersistentVolumeClaim")?;
        let mut pvc = pvc.clone();
        pvc.metadata.namespace = Some(namespace.to_string());
        let name = state.resolve_name(&mut pvc.metadata);
        pvc.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        });
        let claim_key = key(namespace, &name);
        state.claims.insert(claim_key.clone(), pvc);
        state.try_bind(&claim_key, false);
        Ok(state.claims.get(&claim_key).cloned().unwrap_or_default())
    }

    async fn get_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>> {
        Ok(self.state.lock().claims.get(&key(namespace, name)).cloned())
    }

    async fn resize_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
        size: &str,
    ) -> Result<PersistentVolumeClaim> {
        let mut state = self.state.lock();
        let claim_key = key(namespace, name);
        let pvc = state
            .claims
            .get_mut(&claim_key)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "PersistentVolumeClaim".into(),
                name: name.to_string(),
            })?;

        let quantity = Quantity(size.to_string());
        if let Some(requests) = pvc
            .spec
            .as_mut()
            .and_then(|s| s.resources.as_mut())
            .and_then(|r| r.requests.as_mut())
        {
            requests.insert("storage".to_string(), quantity.clone());
        }
        if let Some(capacity) = pvc.status.as_mut().and_then(|s| s.capacity.as_mut()) {
            capacity.insert("storage".to_string(), quantity.clone());
        }
        let pvc = pvc.clone();

        if let Some(pv_name) = pvc.spec.as_ref().and_then(|s| s.volume_name.as_ref()) {
            if let Some(capacity) = state
                .volumes
                .get_mut(pv_name)
                .and_then(|pv| pv.spec.as_mut())
                .and_then(|s| s.capacity.as_mut())
            {
                capacity.insert("storage".to_string(), quantity);
            }
        }
        Ok(pvc)
    }

    async fn delete_persistent_volume_claim(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_delete("PersistentVolumeClaim")?;
        state.remove_claim(&key(namespace, name));
        state.record(format!("PersistentVolumeClaim/{}/{}", namespace, name));
        Ok(())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let mut state = self.state.lock();
        state.check_create("Pod")?;
        let mut pod = pod.clone();
        pod.metadata.namespace = Some(namespace.to_string());
        let name = state.resolve_name(&mut pod.metadata);
        let pod = state.start_pod(namespace, pod);
        state.pods.insert(key(namespace, &name), pod.clone());
        Ok(pod)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.state.lock().pods.get(&key(namespace, name)).cloned())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let state = self.state.lock();
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), pod)| ns == namespace && matches_selector(pod, label_selector))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_delete("Pod")?;
        let removed = state.pods.remove(&key(namespace, name));
        state.record(format!("Pod/{}/{}", namespace, name));

        let owner = removed.as_ref().and_then(owner_deployment);
        if let Some(deployment) = owner.and_then(|d| state.deployments.get(&key(namespace, &d)).cloned()) {
            state.create_replica(namespace, &deployment);
        }
        Ok(())
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String> {
        Ok(self
            .state
            .lock()
            .logs
            .get(&key(namespace, name))
            .cloned()
            .unwrap_or_default())
    }

    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> Result<ExecOutput> {
        let mut state = self.state.lock();
        let found = state
            .pods
            .get(&key(namespace, pod))
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Pod".into(),
                name: pod.to_string(),
            })?;
        let mounts = state.mounts_of(namespace, &found);
        let line = match command {
            [shell, flag, script] if flag == "-c" && shell.ends_with("sh") => script.clone(),
            _ => command.join(" "),
        };
        Ok(match state.run_step(&line, &mounts) {
            Ok(stdout) => ExecOutput {
                stdout,
                stderr: String::new(),
                success: true,
            },
            Err(stderr) => ExecOutput {
                stdout: String::new(),
                stderr,
                success: false,
            },
        })
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment> {
        let mut state = self.state.lock();
        state.check_create("Deployment")?;
        let mut deployment = deployment.clone();
        deployment.metadata.namespace = Some(namespace.to_string());
        let name = state.resolve_name(&mut deployment.metadata);
        state.deployments.insert(key(namespace, &name), deployment.clone());
        state.create_replica(namespace, &deployment);
        Ok(deployment)
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_delete("Deployment")?;
        state.deployments.remove(&key(namespace, name));
        state
            .pods
            .retain(|(ns, _), pod| !(ns == namespace && owner_deployment(pod).as_deref() == Some(name)));
        state.record(format!("Deployment/{}/{}", namespace, name));
        Ok(())
    }

    async fn list_events(&self, namespace: &str, involved_object: &str) -> Result<Vec<Event>> {
        let state = self.state.lock();
        Ok(state
            .events
            .iter()
            .filter(|e| {
                e.metadata.namespace.as_deref() == Some(namespace)
                    && e.involved_object.name.as_deref() == Some(involved_object)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BackendVolumeProbe for InMemoryCluster {
    async fn volume_exists(&self, volume_id: &str) -> Result<bool> {
        Ok(self.state.lock().backend_volumes.contains(volume_id))
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.state.lock().backend_volumes.remove(volume_id);
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, Volume,
        VolumeMount, VolumeResourceRequirements,
    };

    fn storage_class(binding: &str, reclaim: &str, options: &[&str]) -> StorageClass {
        StorageClass {
            metadata: ObjectMeta {
                generate_name: Some("sc-".into()),
                ..Default::default()
            },
            provisioner: "blob.csi.azure.com".into(),
            reclaim_policy: Some(reclaim.into()),
            volume_binding_mode: Some(binding.into()),
            mount_options: Some(options.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    fn claim(class: &str, size: &str) -> PersistentVolumeClaim {
        let mut requests = BTreeMap::new();
        requests.insert("storage".to_string(), Quantity(size.into()));
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                generate_name: Some("pvc-".into()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                storage_class_name: Some(class.into()),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(cmd: &str, claim: &str, read_only: bool) -> Pod {
        Pod {
            metadata: ObjectMeta {
                generate_name: Some("tester-".into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "c".into(),
                    args: Some(vec!["-c".into(), cmd.into()]),
                    volume_mounts: Some(vec![VolumeMount {
                        name: "test-volume-1".into(),
                        mount_path: "/mnt/test-1".into(),
                        read_only: Some(read_only),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                volumes: Some(vec![Volume {
                    name: "test-volume-1".into(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: claim.into(),
                        read_only: None,
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_immediate_claim_binds_on_create() {
        let cluster = InMemoryCluster::new();
        let sc = cluster
            .create_storage_class(&storage_class("Immediate", "Delete", &["-o allow_other"]))
            .await
            .unwrap();
        let sc_name = sc.metadata.name.unwrap();
        assert!(sc_name.starts_with("sc-"));

        let pvc = cluster
            .create_persistent_volume_claim("ns", &claim(&sc_name, "10Gi"))
            .await
            .unwrap();
        assert_eq!(pvc.status.unwrap().phase.as_deref(), Some("Bound"));

        let pv_name = pvc.spec.unwrap().volume_name.unwrap();
        let pv = cluster.get_persistent_volume(&pv_name).await.unwrap().unwrap();
        let handle = pv.spec.unwrap().csi.unwrap().volume_handle;
        assert!(cluster.volume_exists(&handle).await.unwrap());
    }

    #[tokio::test]
    async fn test_deferred_claim_binds_with_consumer() {
        let cluster = InMemoryCluster::new();
        let sc = cluster
            .create_storage_class(&storage_class("WaitForFirstConsumer", "Delete", &[]))
            .await
            .unwrap();
        let pvc = cluster
            .create_persistent_volume_claim("ns", &claim(sc.metadata.name.as_deref().unwrap(), "1Gi"))
            .await
            .unwrap();
        assert_eq!(pvc.status.unwrap().phase.as_deref(), Some("Pending"));

        let claim_name = pvc.metadata.name.unwrap();
        cluster
            .create_pod("ns", &pod("true", &claim_name, false))
            .await
            .unwrap();
        let bound = cluster
            .get_persistent_volume_claim("ns", &claim_name)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bound.status.unwrap().phase.as_deref(), Some("Bound"));
    }

    #[tokio::test]
    async fn test_retain_releases_volume() {
        let cluster = InMemoryCluster::new();
        let sc = cluster
            .create_storage_class(&storage_class("Immediate", "Retain", &[]))
            .await
            .unwrap();
        let pvc = cluster
            .create_persistent_volume_claim("ns", &claim(sc.metadata.name.as_deref().unwrap(), "1Gi"))
            .await
            .unwrap();
        let pv_name = pvc.spec.unwrap().volume_name.unwrap();

        cluster
            .delete_persistent_volume_claim("ns", pvc.metadata.name.as_deref().unwrap())
            .await
            .unwrap();
        let pv = cluster.get_persistent_volume(&pv_name).await.unwrap().unwrap();
        assert_eq!(pv.status.unwrap().phase.as_deref(), Some("Released"));
    }

    #[tokio::test]
    async fn test_pod_writes_and_reads_volume() {
        let cluster = InMemoryCluster::new();
        let sc = cluster
            .create_storage_class(&storage_class("Immediate", "Delete", &[]))
            .await
            .unwrap();
        let pvc = cluster
            .create_persistent_volume_claim("ns", &claim(sc.metadata.name.as_deref().unwrap(), "1Gi"))
            .await
            .unwrap();
        let claim_name = pvc.metadata.name.unwrap();

        let writer = cluster
            .create_pod(
                "ns",
                &pod(
                    "echo 'hello world' > /mnt/test-1/data && grep 'hello world' /mnt/test-1/data",
                    &claim_name,
                    false,
                ),
            )
            .await
            .unwrap();
        assert_eq!(writer.status.unwrap().phase.as_deref(), Some("Succeeded"));
        let writer_name = writer.metadata.name.unwrap();
        assert_eq!(cluster.pod_logs("ns", &writer_name).await.unwrap(), "hello world\n");

        let reader = cluster
            .create_pod("ns", &pod("while true; do sleep 1; done", &claim_name, false))
            .await
            .unwrap();
        let out = cluster
            .exec(
                "ns",
                reader.metadata.name.as_deref().unwrap(),
                &["cat".to_string(), "/mnt/test-1/data".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(out.stdout, "hello world\n");
    }

    #[tokio::test]
    async fn test_read_only_mount_fails_writes() {
        let cluster = InMemoryCluster::new();
        let sc = cluster
            .create_storage_class(&storage_class("Immediate", "Delete", &[]))
            .await
            .unwrap();
        let pvc = cluster
            .create_persistent_volume_claim("ns", &claim(sc.metadata.name.as_deref().unwrap(), "1Gi"))
            .await
            .unwrap();
        let created = cluster
            .create_pod("ns", &pod("touch /mnt/test-1/data", pvc.metadata.name.as_deref().unwrap(), true))
            .await
            .unwrap();
        assert_eq!(created.status.unwrap().phase.as_deref(), Some("Failed"));
        let logs = cluster
            .pod_logs("ns", created.metadata.name.as_deref().unwrap())
            .await
            .unwrap();
        assert!(logs.contains("Read-only file system"));
    }

    #[tokio::test]
    async fn test_invalid_mount_options_record_event() {
        let cluster = InMemoryCluster::new();
        let sc = cluster
            .create_storage_class(&storage_class("Immediate", "Delete", &["invalid", "mount"]))
            .await
            .unwrap();
        let pvc = cluster
            .create_persistent_volume_claim("ns", &claim(sc.metadata.name.as_deref().unwrap(), "1Gi"))
            .await
            .unwrap();
        let created = cluster
            .create_pod("ns", &pod("true", pvc.metadata.name.as_deref().unwrap(), false))
            .await
            .unwrap();
        assert_eq!(created.status.unwrap().phase.as_deref(), Some("Pending"));

        let events = cluster
            .list_events("ns", created.metadata.name.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason.as_deref(), Some("FailedMount"));
    }

    #[tokio::test]
    async fn test_class_less_claim_binds_to_available_volume() {
        let cluster = InMemoryCluster::new();
        let mut capacity = BTreeMap::new();
        capacity.insert("storage".to_string(), Quantity("10Gi".into()));
        let pv = cluster
            .create_persistent_volume(&PersistentVolume {
                metadata: ObjectMeta {
                    generate_name: Some("pre-".into()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeSpec {
                    capacity: Some(capacity),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .await
            .unwrap();

        let pvc = cluster
            .create_persistent_volume_claim("ns", &claim("", "10Gi"))
            .await
            .unwrap();
        assert_eq!(pvc.spec.unwrap().volume_name, pv.metadata.name);
    }

    #[tokio::test]
    async fn test_injected_create_failure() {
        let cluster = InMemoryCluster::new();
        cluster.fail_creates_of("Pod");
        let err = cluster.create_pod("ns", &pod("true", "none", false)).await.unwrap_err();
        assert!(!err.is_not_found());
        assert_eq!(cluster.pod_count(), 0);
    }

    #[test]
    fn test_split_quoted() {
        assert_eq!(
            split_quoted("'hello world' /mnt/test-1/data"),
            ("hello world".to_string(), " /mnt/test-1/data")
        );
        assert_eq!(unquote("'hello world'"), "hello world");
    }
}
