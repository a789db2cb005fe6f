//! Blob Container Probe
//!
//! Checks the storage account directly for the container behind a CSI
//! volume handle. Handles look like `rg#account#container#...`; only the
//! account and container fields are used.

use crate::config::BackendConfig;
use crate::domain::ports::BackendVolumeProbe;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info};

const BACKEND_NAME: &str = "azure-blob";

/// Storage service API version sent with every request
const STORAGE_API_VERSION: &str = "2021-08-06";

/// Account and container named by a volume handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobContainerRef {
    pub account: String,
    pub container: String,
}

impl BlobContainerRef {
    pub fn parse(volume_id: &str) -> Result<Self> {
        let mut parts = volume_id.split('#');
        let _resource_group = parts.next();
        let account = parts.next().filter(|s| !s.is_empty());
        let container = parts.next().filter(|s| !s.is_empty());
        match (account, container) {
            (Some(account), Some(container)) => Ok(Self {
                account: account.to_string(),
                container: container.to_string(),
            }),
            _ => Err(Error::Backend {
                backend: BACKEND_NAME.to_string(),
                reason: format!("malformed volume handle {:?}", volume_id),
            }),
        }
    }
}

/// `BackendVolumeProbe` over the blob service REST API
pub struct BlobContainerProbe {
    http: reqwest::Client,
    endpoint_suffix: String,
    sas_token: Option<String>,
}

impl BlobContainerProbe {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            endpoint_suffix: config.endpoint_suffix.clone(),
            sas_token: config
                .sas_token
                .as_ref()
                .map(|t| t.trim_start_matches('?').to_string()),
        })
    }

    /// Container URL, with the SAS token appended when configured
    pub fn container_url(&self, target: &BlobContainerRef) -> String {
        let mut url = format!(
            "https://{}.blob.{}/{}?restype=container",
            target.account, self.endpoint_suffix, target.container
        );
        if let Some(sas) = self.sas_token.as_deref().filter(|s| !s.is_empty()) {
            url.push('&');
            url.push_str(sas);
        }
        url
    }

    fn unexpected(&self, op: &str, status: StatusCode) -> Error {
        Error::Backend {
            backend: BACKEND_NAME.to_string(),
            reason: format!("{} returned {}", op, status),
        }
    }
}

#[async_trait]
impl BackendVolumeProbe for BlobContainerProbe {
    async fn volume_exists(&self, volume_id: &str) -> Result<bool> {
        let target = BlobContainerRef::parse(volume_id)?;
        let response = self
            .http
            .head(self.container_url(&target))
            .header("x-ms-version", STORAGE_API_VERSION)
            .send()
            .await?;
        debug!(
            "HEAD container {}/{}: {}",
            target.account,
            target.container,
            response.status()
        );

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(self.unexpected("HEAD container", s)),
        }
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        let target = BlobContainerRef::parse(volume_id)?;
        info!("Deleting container {}/{}", target.account, target.container);
        let response = self
            .http
            .delete(self.container_url(&target))
            .header("x-ms-version", STORAGE_API_VERSION)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            s => Err(self.unexpected("DELETE container", s)),
        }
    }

    fn backend_name(&self) -> &str {
        BACKEND_NAME
    }
}
