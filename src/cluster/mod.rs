//! Cluster Adapters
//!
//! Implementations of the `ClusterApi` and `BackendVolumeProbe` ports: the
//! live API server and the blob service. Unit tests run against the
//! in-memory fixture in `memory`.

pub mod blob_probe;
pub mod kube_cluster;
#[cfg(test)]
pub mod memory;

pub use blob_probe::*;
pub use kube_cluster::*;
#[cfg(test)]
pub use memory::*;
