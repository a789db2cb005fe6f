//! Harness Configuration
//!
//! Process-wide settings read once at startup and handed to every scenario
//! as an `Arc<HarnessConfig>`. Nothing below the runner reads the
//! environment on its own.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the Azure cloud the cluster runs in
pub const CLOUD_NAME_ENV: &str = "AZURE_CLOUD_NAME";

/// Storage account SKUs accepted by Azure public cloud
pub const PUBLIC_CLOUD_STORAGE_ACCOUNT_TYPES: &[&str] =
    &["Standard_LRS", "Premium_LRS", "Standard_GRS", "Standard_RAGRS"];

/// Storage account SKUs accepted by Azure Stack Hub
pub const STACK_CLOUD_STORAGE_ACCOUNT_TYPES: &[&str] = &["Standard_LRS", "Premium_LRS"];

// =============================================================================
// Cloud Environment
// =============================================================================

/// Azure cloud flavour, decides which storage tiers are legal to request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CloudEnvironment {
    #[default]
    AzurePublicCloud,
    AzureStackCloud,
}

impl CloudEnvironment {
    /// Derive the cloud from a raw `AZURE_CLOUD_NAME` value
    pub fn from_cloud_name(name: Option<&str>) -> Self {
        match name {
            Some(n) if n.eq_ignore_ascii_case("AZURESTACKCLOUD") => Self::AzureStackCloud,
            _ => Self::AzurePublicCloud,
        }
    }

    /// Read the cloud flag from the process environment
    pub fn from_env() -> Self {
        Self::from_cloud_name(std::env::var(CLOUD_NAME_ENV).ok().as_deref())
    }

    /// Storage account SKUs this cloud supports
    pub fn supported_storage_account_types(&self) -> &'static [&'static str] {
        match self {
            Self::AzurePublicCloud => PUBLIC_CLOUD_STORAGE_ACCOUNT_TYPES,
            Self::AzureStackCloud => STACK_CLOUD_STORAGE_ACCOUNT_TYPES,
        }
    }
}

impl std::fmt::Display for CloudEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudEnvironment::AzurePublicCloud => write!(f, "AzurePublicCloud"),
            CloudEnvironment::AzureStackCloud => write!(f, "AzureStackCloud"),
        }
    }
}

// =============================================================================
// Timeouts
// =============================================================================

/// Upper bounds for every polled condition, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Timeouts {
    pub claim_bound_secs: u64,
    pub pod_start_secs: u64,
    pub pod_complete_secs: u64,
    pub volume_delete_secs: u64,
    pub event_secs: u64,
    pub resize_secs: u64,
    /// How long a retained volume is watched after it reports Released
    pub retain_check_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            claim_bound_secs: 300,
            pod_start_secs: 900,
            pod_complete_secs: 900,
            volume_delete_secs: 600,
            event_secs: 300,
            resize_secs: 300,
            retain_check_secs: 30,
        }
    }
}

impl Timeouts {
    pub fn claim_bound(&self) -> Duration {
        Duration::from_secs(self.claim_bound_secs)
    }

    pub fn pod_start(&self) -> Duration {
        Duration::from_secs(self.pod_start_secs)
    }

    pub fn pod_complete(&self) -> Duration {
        Duration::from_secs(self.pod_complete_secs)
    }

    pub fn volume_delete(&self) -> Duration {
        Duration::from_secs(self.volume_delete_secs)
    }

    pub fn event(&self) -> Duration {
        Duration::from_secs(self.event_secs)
    }

    pub fn resize(&self) -> Duration {
        Duration::from_secs(self.resize_secs)
    }

    pub fn retain_check(&self) -> Duration {
        Duration::from_secs(self.retain_check_secs)
    }
}

// =============================================================================
// Scripts & Backend
// =============================================================================

/// Location of the external helper scripts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScriptConfig {
    /// Working directory the scripts are run from (the driver repo root)
    pub repo_root: PathBuf,
    /// Gate run before each scenario
    pub restart_check: PathBuf,
    /// Resolves the storage account secret for bring-your-own-key runs
    pub secret_name: PathBuf,
    /// Whether to run the restart gate at all
    pub check_driver_restarts: bool,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            restart_check: PathBuf::from("test/utils/check_driver_pods_restart.sh"),
            secret_name: PathBuf::from("test/utils/get_storage_account_secret_name.sh"),
            check_driver_restarts: true,
        }
    }
}

/// Access to the blob service backing the provisioned volumes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackendConfig {
    /// DNS suffix of the blob endpoint (`{account}.blob.{suffix}`)
    pub endpoint_suffix: String,
    /// Account SAS token appended to backend requests
    pub sas_token: Option<String>,
    /// Existing container used by the pre-provisioned scenario
    pub pre_provisioned_volume_id: Option<String>,
    /// Secret holding account credentials for pre-provisioned and inline volumes
    pub account_secret_name: Option<String>,
    /// Container referenced by the inline scenario
    pub inline_share_name: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint_suffix: "core.windows.net".to_string(),
            sas_token: None,
            pre_provisioned_volume_id: None,
            account_secret_name: None,
            inline_share_name: None,
        }
    }
}

// =============================================================================
// Harness Configuration
// =============================================================================

/// Configuration for a harness run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HarnessConfig {
    /// Cloud the cluster runs in
    pub cloud: CloudEnvironment,
    /// CSI driver (provisioner) name under test
    pub driver_name: String,
    /// Container image for tester pods
    pub image: String,
    /// Prefix for per-scenario namespaces
    pub namespace_prefix: String,
    /// Interval between polls of eventually-consistent state
    pub poll_interval_secs: u64,
    pub timeouts: Timeouts,
    pub scripts: ScriptConfig,
    pub backend: BackendConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            cloud: CloudEnvironment::default(),
            driver_name: "blob.csi.azure.com".to_string(),
            image: "registry.k8s.io/e2e-test-images/busybox:1.29-4".to_string(),
            namespace_prefix: "blob-".to_string(),
            poll_interval_secs: 5,
            timeouts: Timeouts::default(),
            scripts: ScriptConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load from an optional YAML file, then apply the cloud flag from the
    /// environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)?;
                Self::from_yaml(&raw)?
            }
            None => Self::default(),
        };
        if std::env::var_os(CLOUD_NAME_ENV).is_some() {
            config.cloud = CloudEnvironment::from_env();
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document
    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Reject settings the harness cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.driver_name.is_empty() {
            return Err(Error::Configuration("driver name must not be empty".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Configuration("poll interval must be positive".into()));
        }
        Ok(())
    }

    /// Settings for the in-memory test cluster, where every state change
    /// lands synchronously: each condition is checked once and never waited on
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            poll_interval_secs: 0,
            timeouts: Timeouts {
                claim_bound_secs: 0,
                pod_start_secs: 0,
                pod_complete_secs: 0,
                volume_delete_secs: 0,
                event_secs: 0,
                resize_secs: 0,
                retain_check_secs: 0,
            },
            scripts: ScriptConfig {
                check_driver_restarts: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Storage account SKUs legal for the configured cloud
    pub fn supported_storage_account_types(&self) -> &'static [&'static str] {
        self.cloud.supported_storage_account_types()
    }
}
