//! Scenario Runner
//!
//! Gives each scenario its own namespace and cleanup stack, runs it, and
//! always unwinds the stack afterwards. A failing scenario never affects
//! the others; they share only the cluster handle and the configuration.

use crate::config::HarnessConfig;
use crate::domain::ports::{ClusterApiRef, HelperScriptsRef};
use crate::error::{Error, FailureKind, Result};
use crate::resources::{CleanupAction, CleanupStack, TestContext};
use crate::scenarios::ScenarioRef;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

// =============================================================================
// Reports
// =============================================================================

/// Outcome of one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Cleanup actions that ran, including failed ones
    pub cleanup_actions: usize,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub scenarios: Vec<ScenarioReport>,
}

impl RunSummary {
    pub fn from_reports(scenarios: Vec<ScenarioReport>) -> Self {
        let passed = scenarios.iter().filter(|r| r.passed).count();
        Self {
            total: scenarios.len(),
            passed,
            failed: scenarios.len() - passed,
            scenarios,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Runs scenarios against one cluster
#[derive(Clone)]
pub struct Runner {
    cluster: ClusterApiRef,
    scripts: HelperScriptsRef,
    config: Arc<HarnessConfig>,
}

impl Runner {
    pub fn new(cluster: ClusterApiRef, scripts: HelperScriptsRef, config: Arc<HarnessConfig>) -> Self {
        Self {
            cluster,
            scripts,
            config,
        }
    }

    /// Run one scenario end to end and report how it went
    pub async fn run(&self, scenario: ScenarioRef) -> ScenarioReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let name = scenario.name().to_string();
        info!("Running scenario: {}", name);

        let mut cleanup = CleanupStack::new();
        let outcome = self.execute(&scenario, &mut cleanup).await;
        let cleanup_actions = cleanup.len();
        let unwound = cleanup.unwind(self.cluster.as_ref(), &self.config).await;

        // the scenario's own failure wins over a teardown failure
        let failure = match (outcome, unwound) {
            (Err(e), Err(cleanup_err)) => {
                warn!("Scenario {} also failed to clean up: {}", name, cleanup_err);
                Some(e)
            }
            (Err(e), Ok(_)) | (Ok(()), Err(e)) => Some(e),
            (Ok(()), Ok(_)) => None,
        };

        let duration = start.elapsed();
        match &failure {
            None => info!("Scenario passed in {:.1}s: {}", duration.as_secs_f64(), name),
            Some(e) => error!("Scenario failed ({}): {}: {}", e.kind(), name, e),
        }

        ScenarioReport {
            name,
            passed: failure.is_none(),
            failure_kind: failure.as_ref().map(Error::kind),
            message: failure.map(|e| e.to_string()),
            cleanup_actions,
            duration,
            started_at,
        }
    }

    /// Restart gate, namespace, then the scenario body
    async fn execute(&self, scenario: &ScenarioRef, cleanup: &mut CleanupStack) -> Result<()> {
        self.scripts.check_driver_pods_restart().await?;

        let namespace = self
            .cluster
            .create_namespace(&self.config.namespace_prefix)
            .await?
            .metadata
            .name
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Namespace".into(),
                name: self.config.namespace_prefix.clone(),
            })?;
        info!("Created namespace {}", namespace);
        cleanup.push(CleanupAction::DeleteNamespace {
            name: namespace.clone(),
        });

        let ctx = TestContext::new(self.cluster.clone(), namespace, self.config.clone());
        scenario.run(&ctx, cleanup).await
    }

    /// Run every scenario, at most `parallelism` at a time
    pub async fn run_all(&self, scenarios: Vec<ScenarioRef>, parallelism: usize) -> RunSummary {
        let reports: Vec<ScenarioReport> = stream::iter(scenarios)
            .map(|scenario| self.run(scenario))
            .buffer_unordered(parallelism.max(1))
            .collect()
            .await;

        let summary = RunSummary::from_reports(reports);
        info!(
            "Ran {} scenarios: {} passed, {} failed",
            summary.total, summary.passed, summary.failed
        );
        summary
    }
}
