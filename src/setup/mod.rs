//! Setup Orchestrators
//!
//! Expand `PodDetails` / `VolumeDetails` into live cluster objects. Each
//! orchestrator creates objects in dependency order (StorageClass, then
//! PersistentVolume, then claim, then workload) and pushes one
//! `CleanupAction` per created object onto the caller's `CleanupStack`
//! immediately after the create call succeeds. A failure returns early;
//! whatever was registered up to that point is still unwound by the caller.
//!
//! ```text
//! PodDetails ──► VolumeProvisioner ──┬─► Dynamic         (StorageClass + claim)
//!                  (per volume)      ├─► PreProvisioned  (PersistentVolume + claim)
//!                                    └─► Inline          (CSI source in pod spec)
//! ```

pub mod pod;
pub mod provisioner;
pub mod volume;

pub use pod::*;
pub use provisioner::*;
pub use volume::*;
