//! Declarative Scenario Model
//!
//! `PodDetails` and `VolumeDetails` describe what a scenario wants, not how
//! it is realized. A setup orchestrator consumes them once; they are never
//! mutated after construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Policies
// =============================================================================

/// What happens to the backend volume once its claim is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    Delete,
    Retain,
}

impl ReclaimPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReclaimPolicy::Delete => "Delete",
            ReclaimPolicy::Retain => "Retain",
        }
    }

    /// Parse the Kubernetes spelling
    pub fn from_k8s(value: &str) -> Option<Self> {
        match value {
            "Delete" => Some(ReclaimPolicy::Delete),
            "Retain" => Some(ReclaimPolicy::Retain),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReclaimPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a claim gets provisioned relative to its creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeBindingMode {
    #[default]
    Immediate,
    WaitForFirstConsumer,
}

impl VolumeBindingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeBindingMode::Immediate => "Immediate",
            VolumeBindingMode::WaitForFirstConsumer => "WaitForFirstConsumer",
        }
    }

    pub fn from_k8s(value: &str) -> Option<Self> {
        match value {
            "Immediate" => Some(VolumeBindingMode::Immediate),
            "WaitForFirstConsumer" => Some(VolumeBindingMode::WaitForFirstConsumer),
            _ => None,
        }
    }
}

impl std::fmt::Display for VolumeBindingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    ReadWriteOncePod,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadWriteOnce => "ReadWriteOnce",
            AccessMode::ReadOnlyMany => "ReadOnlyMany",
            AccessMode::ReadWriteMany => "ReadWriteMany",
            AccessMode::ReadWriteOncePod => "ReadWriteOncePod",
        }
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a volume is consumed as a mounted filesystem or a raw device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeMode {
    #[default]
    FileSystem,
    Block,
}

impl VolumeMode {
    /// Kubernetes spelling used in claim specs
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeMode::FileSystem => "Filesystem",
            VolumeMode::Block => "Block",
        }
    }
}

// =============================================================================
// Attachment
// =============================================================================

/// How a filesystem volume is mounted into the pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMountDetails {
    pub name_generate: String,
    pub mount_path_generate: String,
    pub read_only: bool,
}

impl Default for VolumeMountDetails {
    fn default() -> Self {
        Self {
            name_generate: "test-volume-".to_string(),
            mount_path_generate: "/mnt/test-".to_string(),
            read_only: false,
        }
    }
}

/// How a block volume is exposed to the pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDeviceDetails {
    pub name_generate: String,
    pub device_path: String,
}

/// Mount path or raw device; a volume is always exactly one of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeAttachment {
    Mount(VolumeMountDetails),
    Device(VolumeDeviceDetails),
}

impl Default for VolumeAttachment {
    fn default() -> Self {
        VolumeAttachment::Mount(VolumeMountDetails::default())
    }
}

/// Names generated for one volume at a given position in a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentNames {
    /// Pod-level volume name
    pub volume_name: String,
    /// Mount path or device path inside the container
    pub path: String,
}

impl VolumeAttachment {
    pub fn volume_mode(&self) -> VolumeMode {
        match self {
            VolumeAttachment::Mount(_) => VolumeMode::FileSystem,
            VolumeAttachment::Device(_) => VolumeMode::Block,
        }
    }

    /// Names for the volume at zero-based `index`; suffixes are 1-based.
    /// Device paths are used as given.
    pub fn names(&self, index: usize) -> AttachmentNames {
        let ordinal = index + 1;
        match self {
            VolumeAttachment::Mount(m) => AttachmentNames {
                volume_name: format!("{}{}", m.name_generate, ordinal),
                path: format!("{}{}", m.mount_path_generate, ordinal),
            },
            VolumeAttachment::Device(d) => AttachmentNames {
                volume_name: format!("{}{}", d.name_generate, ordinal),
                path: d.device_path.clone(),
            },
        }
    }

    pub fn read_only(&self) -> bool {
        matches!(self, VolumeAttachment::Mount(m) if m.read_only)
    }
}

// =============================================================================
// Volume Details
// =============================================================================

/// Source a claim is cloned or restored from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub kind: String,
    pub name: String,
}

/// Desired volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeDetails {
    /// Requested size, e.g. "10Gi"
    pub claim_size: String,
    pub fs_type: Option<String>,
    pub mount_options: Vec<String>,
    /// Falls back to the driver's default when unset
    pub reclaim_policy: Option<ReclaimPolicy>,
    /// Falls back to `Immediate` when unset
    pub volume_binding_mode: Option<VolumeBindingMode>,
    pub allowed_topology_values: Vec<String>,
    pub attachment: VolumeAttachment,
    /// Backend volume id, pre-provisioned volumes only
    pub volume_id: Option<String>,
    pub data_source: Option<DataSource>,
    /// Name of an existing StorageClass to use instead of a generated one
    pub storage_class: Option<String>,
    /// Secret holding node-stage credentials, pre-provisioned volumes only
    pub node_stage_secret_ref: Option<String>,
    /// Extra CSI volume attributes, pre-provisioned volumes only
    pub attributes: BTreeMap<String, String>,
    /// Overrides the default single-writer access mode when non-empty
    pub access_modes: Vec<AccessMode>,
}

impl VolumeDetails {
    /// A filesystem volume of the given size with default mount naming
    pub fn new(claim_size: impl Into<String>) -> Self {
        Self {
            claim_size: claim_size.into(),
            ..Default::default()
        }
    }

    pub fn with_fs_type(mut self, fs_type: impl Into<String>) -> Self {
        self.fs_type = Some(fs_type.into());
        self
    }

    pub fn with_mount_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mount_options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reclaim_policy(mut self, policy: ReclaimPolicy) -> Self {
        self.reclaim_policy = Some(policy);
        self
    }

    pub fn with_binding_mode(mut self, mode: VolumeBindingMode) -> Self {
        self.volume_binding_mode = Some(mode);
        self
    }

    pub fn read_only(mut self) -> Self {
        if let VolumeAttachment::Mount(m) = &mut self.attachment {
            m.read_only = true;
        }
        self
    }

    pub fn with_attachment(mut self, attachment: VolumeAttachment) -> Self {
        self.attachment = attachment;
        self
    }

    pub fn volume_mode(&self) -> VolumeMode {
        self.attachment.volume_mode()
    }

    pub fn binding_mode(&self) -> VolumeBindingMode {
        self.volume_binding_mode.unwrap_or_default()
    }

    /// Whether the claim can be expected bound right after creation
    pub fn binds_immediately(&self) -> bool {
        self.binding_mode() == VolumeBindingMode::Immediate
    }
}

// =============================================================================
// Pod Details
// =============================================================================

/// Desired workload: a shell command plus the volumes it needs, in order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodDetails {
    pub cmd: String,
    pub volumes: Vec<VolumeDetails>,
}

impl PodDetails {
    pub fn new(cmd: impl Into<String>, volumes: Vec<VolumeDetails>) -> Self {
        Self {
            cmd: cmd.into(),
            volumes,
        }
    }

    /// Generated names for every volume, in list order
    pub fn attachment_names(&self) -> Vec<AttachmentNames> {
        self.volumes
            .iter()
            .enumerate()
            .map(|(n, v)| v.attachment.names(n))
            .collect()
    }
}
