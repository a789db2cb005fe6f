//! Domain layer - Scenario model and port definitions
//!
//! Declarative descriptors (`PodDetails`, `VolumeDetails`) live next to the
//! traits (ports) through which the harness reaches the cluster and the
//! storage backend.

pub mod ports;
pub mod quantity;
pub mod specs;

pub use ports::*;
pub use quantity::*;
pub use specs::*;
