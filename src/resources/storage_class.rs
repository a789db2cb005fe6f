//! StorageClass wrapper

use super::{CleanupAction, TestContext};
use crate::error::{Error, Result};
use k8s_openapi::api::storage::v1::StorageClass;
use tracing::info;

/// A StorageClass created for one scenario
pub struct TestStorageClass {
    ctx: TestContext,
    storage_class: StorageClass,
    created: Option<StorageClass>,
}

impl TestStorageClass {
    pub fn new(ctx: TestContext, storage_class: StorageClass) -> Self {
        Self {
            ctx,
            storage_class,
            created: None,
        }
    }

    /// Create the class and return the object the API server stored
    pub async fn create(&mut self) -> Result<StorageClass> {
        info!(
            "Creating StorageClass {} (provisioner {})",
            self.storage_class
                .metadata
                .generate_name
                .as_deref()
                .or(self.storage_class.metadata.name.as_deref())
                .unwrap_or_default(),
            self.storage_class.provisioner
        );
        let created = self.ctx.cluster.create_storage_class(&self.storage_class).await?;
        info!(
            "Created StorageClass {}",
            created.metadata.name.as_deref().unwrap_or_default()
        );
        self.created = Some(created.clone());
        Ok(created)
    }

    pub fn name(&self) -> Result<&str> {
        self.created
            .as_ref()
            .and_then(|sc| sc.metadata.name.as_deref())
            .ok_or_else(|| not_created("StorageClass"))
    }

    pub fn cleanup_action(&self) -> Result<CleanupAction> {
        Ok(CleanupAction::DeleteStorageClass {
            name: self.name()?.to_string(),
        })
    }
}

pub(crate) fn not_created(kind: &str) -> Error {
    Error::ResourceNotFound {
        kind: kind.to_string(),
        name: "<not yet created>".to_string(),
    }
}
