//! Blob CSI E2E - End-to-end scenario harness
//!
//! Drives a Kubernetes cluster running the Azure Blob CSI driver through
//! declarative scenarios: StorageClasses, claims, pods and deployments are
//! created from `PodDetails`/`VolumeDetails`, the outcome is asserted, and
//! every created object is torn down again in reverse order.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                               Runner                                         │
//! │        restart gate → namespace → scenario → cleanup unwind → report         │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │    Scenarios    │  │  Setup          │  │      Cleanup Stack          │  │
//! │  │  (one per case) │─▶│  Orchestrators  │─▶│  (reverse-order teardown)   │  │
//! │  └─────────────────┘  └────────┬────────┘  └─────────────────────────────┘  │
//! │                                │                                             │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │   Resource Wrappers   │                                │
//! │                    │ SC / PVC / PV / Pod / │                                │
//! │                    │      Deployment       │                                │
//! │                    └───────────┬───────────┘                                │
//! ├────────────────────────────────┼────────────────────────────────────────────┤
//! │                          Ports │                                             │
//! │  ┌─────────────────┐  ┌────────┴────────┐  ┌─────────────────────────────┐  │
//! │  │  ClusterApi     │  │ BackendVolume   │  │      HelperScripts          │  │
//! │  │     (kube)      │  │ Probe (blob)    │  │   (sh / bash helpers)       │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`domain`]: Scenario descriptions, quantities and the port traits
//! - [`cluster`]: Live implementations of the ports
//! - [`driver`]: StorageClass and PersistentVolume builders for the driver
//! - [`resources`]: Wrappers around single cluster objects, polling, cleanup
//! - [`setup`]: Expansion of pod/volume descriptions into live objects
//! - [`scenarios`]: Scenario drivers and the suites built from them
//! - [`runner`]: Per-scenario namespace, teardown and reporting
//! - [`error`]: Error types and failure classification

pub mod cluster;
pub mod config;
pub mod domain;
pub mod driver;
pub mod error;
pub mod resources;
pub mod runner;
pub mod scenarios;
pub mod scripts;
pub mod setup;

// Re-export commonly used types
pub use cluster::{BlobContainerProbe, KubeCluster};

pub use config::{CloudEnvironment, HarnessConfig};

pub use domain::ports::{
    BackendVolumeProbe, BackendVolumeProbeRef, ClusterApi, ClusterApiRef, HelperScripts,
    HelperScriptsRef,
};

pub use domain::specs::{
    AccessMode, PodDetails, ReclaimPolicy, VolumeAttachment, VolumeBindingMode, VolumeDetails,
};

pub use driver::{BlobCsiDriver, DynamicPvTestDriver, PreProvisionedVolumeTestDriver};

pub use error::{Error, FailureKind, Result};

pub use resources::{CleanupAction, CleanupStack, TestContext};

pub use runner::{RunSummary, Runner, ScenarioReport};

pub use scenarios::{catalog, Scenario, ScenarioRef};

pub use scripts::ScriptRunner;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
