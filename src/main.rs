//! Blob CSI E2E
//!
//! Runs the Blob CSI driver scenario suites against the current kubeconfig
//! context.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blob_csi_e2e::{
    catalog, BackendVolumeProbeRef, BlobContainerProbe, BlobCsiDriver, ClusterApiRef,
    HarnessConfig, HelperScriptsRef, KubeCluster, Runner, ScenarioRef, ScriptRunner,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Blob CSI E2E - scenario harness for the Azure Blob CSI driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Harness configuration file (YAML)
    #[arg(long, env = "E2E_CONFIG")]
    config: Option<PathBuf>,

    /// Only run scenarios whose name contains this text (repeatable)
    #[arg(long = "scenario", value_name = "TEXT")]
    scenarios: Vec<String>,

    /// List the selected scenarios and exit
    #[arg(long)]
    list: bool,

    /// Scenarios run at the same time
    #[arg(long, env = "E2E_PARALLEL", default_value = "1")]
    parallel: usize,

    /// CSI driver name under test
    #[arg(long, env = "DRIVER_NAME")]
    driver_name: Option<String>,

    /// Prefix for per-scenario namespaces
    #[arg(long, env = "NAMESPACE_PREFIX")]
    namespace_prefix: Option<String>,

    /// Skip the driver pod restart check before each scenario
    #[arg(long)]
    skip_restart_check: bool,

    /// Write the run summary as JSON to this file
    #[arg(long)]
    report_json: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = Arc::new(load_config(&args)?);

    info!("Starting Blob CSI E2E");
    info!("  Version: {}", blob_csi_e2e::VERSION);
    info!("  Driver: {}", config.driver_name);
    info!("  Cloud: {}", config.cloud);

    let driver = Arc::new(BlobCsiDriver::new(config.driver_name.clone()));

    let backend: BackendVolumeProbeRef = Arc::new(
        BlobContainerProbe::new(&config.backend).context("building the blob backend client")?,
    );
    let scripts: HelperScriptsRef = Arc::new(ScriptRunner::new(&config.scripts));

    let mut scenarios =
        catalog::dynamic_provisioning_suite(driver.clone(), &config, backend, scripts.clone());
    scenarios.extend(catalog::extended_suite(driver, &config));
    let scenarios = select(scenarios, &args.scenarios);

    if args.list {
        for scenario in &scenarios {
            println!("{}", scenario.name());
        }
        return Ok(());
    }
    if scenarios.is_empty() {
        warn!("No scenario matches {:?}", args.scenarios);
        return Ok(());
    }

    let cluster: ClusterApiRef = Arc::new(
        KubeCluster::try_default()
            .await
            .context("connecting to the Kubernetes API")?,
    );
    let runner = Runner::new(cluster, scripts, config);
    let summary = runner.run_all(scenarios, args.parallel).await;

    if let Some(path) = &args.report_json {
        let body = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, body)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    for report in summary.scenarios.iter().filter(|r| !r.passed) {
        warn!(
            "FAILED [{}] {}: {}",
            report
                .failure_kind
                .map(|k| k.to_string())
                .unwrap_or_default(),
            report.name,
            report.message.as_deref().unwrap_or("")
        );
    }

    if !summary.all_passed() {
        anyhow::bail!("{} of {} scenarios failed", summary.failed, summary.total);
    }
    info!("All {} scenarios passed", summary.total);
    Ok(())
}

/// Config file (or defaults), then command line overrides
fn load_config(args: &Args) -> anyhow::Result<HarnessConfig> {
    let mut config = HarnessConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(name) = &args.driver_name {
        config.driver_name = name.clone();
    }
    if let Some(prefix) = &args.namespace_prefix {
        config.namespace_prefix = prefix.clone();
    }
    if args.skip_restart_check {
        config.scripts.check_driver_restarts = false;
    }
    Ok(config)
}

/// Keep scenarios whose name contains any filter; no filter keeps all
fn select(scenarios: Vec<ScenarioRef>, filters: &[String]) -> Vec<ScenarioRef> {
    if filters.is_empty() {
        return scenarios;
    }
    scenarios
        .into_iter()
        .filter(|s| filters.iter().any(|f| s.name().contains(f.as_str())))
        .collect()
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "rustls=warn"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
