//! Error types for the Blob CSI end-to-end harness
//!
//! Every failure is fatal to the scenario that raised it. The harness never
//! retries an assertion; it classifies the failure for reporting and lets
//! the runner unwind the scenario's cleanup stack.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Setup Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Timed out after {timeout:?} waiting for {condition} (last observed: {last_observed})")]
    Timeout {
        condition: String,
        timeout: Duration,
        last_observed: String,
    },

    #[error("Validation of {kind}/{name} failed: {reason}")]
    ValidationFailed {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Invalid volume details: {0}")]
    InvalidVolumeDetails(String),

    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Assertion Errors
    // =========================================================================
    #[error("Pod {pod} expected to be {expected}, but was {actual}")]
    UnexpectedPodPhase {
        pod: String,
        expected: String,
        actual: String,
    },

    #[error("Exec output of pod {pod} mismatch: expected {expected:?}, got {actual:?}")]
    ExecOutputMismatch {
        pod: String,
        expected: String,
        actual: String,
    },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    // =========================================================================
    // External Collaborator Errors
    // =========================================================================
    #[error("Script {script} exited with {code:?}: {output}")]
    ScriptFailed {
        script: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Backend error: {backend} - {reason}")]
    Backend { backend: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Cleanup Errors
    // =========================================================================
    #[error("{failed} of {total} cleanup actions failed, first: {first}")]
    CleanupFailed {
        failed: usize,
        total: usize,
        first: String,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

/// Which part of a scenario produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Resource creation rejected or a waited-for condition never reached
    Setup,
    /// Observed state did not match the expectation
    Assertion,
    /// A precondition/helper script or the storage backend failed
    Script,
    /// Teardown of a created resource failed
    Cleanup,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Setup => write!(f, "setup"),
            FailureKind::Assertion => write!(f, "assertion"),
            FailureKind::Script => write!(f, "script"),
            FailureKind::Cleanup => write!(f, "cleanup"),
        }
    }
}

impl Error {
    /// Classify this error for reporting
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::UnexpectedPodPhase { .. }
            | Error::ExecOutputMismatch { .. }
            | Error::AssertionFailed(_) => FailureKind::Assertion,

            Error::ScriptFailed { .. } | Error::Backend { .. } | Error::Http(_) => {
                FailureKind::Script
            }

            Error::CleanupFailed { .. } => FailureKind::Cleanup,

            _ => FailureKind::Setup,
        }
    }

    /// Check if this error means the API server reported the object as gone
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}

/// Result type alias for the harness
pub type Result<T> = std::result::Result<T, Error>;
