//! External helper scripts
//!
//! Scripts are run with the driver repository root as their working
//! directory. The process-wide working directory is never changed.

use crate::config::ScriptConfig;
use crate::domain::ports::HelperScripts;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// Runs the helper scripts from a checkout of the driver repository
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    repo_root: PathBuf,
    restart_check: PathBuf,
    secret_name: PathBuf,
    check_driver_restarts: bool,
}

impl ScriptRunner {
    pub fn new(config: &ScriptConfig) -> Self {
        Self {
            repo_root: config.repo_root.clone(),
            restart_check: config.restart_check.clone(),
            secret_name: config.secret_name.clone(),
            check_driver_restarts: config.check_driver_restarts,
        }
    }

    /// Run `interpreter script` and return stdout followed by stderr
    async fn run(&self, interpreter: &str, script: &Path) -> Result<String> {
        info!("Running script {} {}", interpreter, script.display());
        let output = Command::new(interpreter)
            .arg(script)
            .current_dir(&self.repo_root)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        info!("Script {} output: {}", script.display(), combined.trim_end());

        if !output.status.success() {
            return Err(Error::ScriptFailed {
                script: script.display().to_string(),
                code: output.status.code(),
                output: combined,
            });
        }
        Ok(combined)
    }
}

#[async_trait]
impl HelperScripts for ScriptRunner {
    async fn check_driver_pods_restart(&self) -> Result<()> {
        if !self.check_driver_restarts {
            return Ok(());
        }
        info!("Check driver pods if restarts ...");
        self.run("sh", &self.restart_check).await?;
        info!("Check successfully");
        Ok(())
    }

    async fn storage_account_secret_name(&self) -> Result<String> {
        let output = self.run("bash", &self.secret_name).await?;
        let name = output.strip_suffix('\n').unwrap_or(&output).to_string();
        info!("Got storage account secret name: {}", name);
        Ok(name)
    }
}

/// Fixed answers for unit tests
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct StaticScripts {
    secret_name: String,
}

#[cfg(test)]
impl StaticScripts {
    pub fn new(secret_name: impl Into<String>) -> Self {
        Self {
            secret_name: secret_name.into(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl HelperScripts for StaticScripts {
    async fn check_driver_pods_restart(&self) -> Result<()> {
        Ok(())
    }

    async fn storage_account_secret_name(&self) -> Result<String> {
        Ok(self.secret_name.clone())
    }
}
