use anyhow::{Context, Result};
use clap::Parser;
use pgupgrade::{MajorVersion, UpgradeConfig, UpgradeError, UpgradeReport, Upgrader};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "postgresql-upgrade")]
#[command(about = "Upgrade a PostgreSQL cluster in place across several major versions")]
struct Cli {
    /// Version to upgrade from
    #[arg(short = 's', long, alias = "source_version")]
    source_version: MajorVersion,

    /// Version to upgrade to
    #[arg(short = 't', long, alias = "target_version")]
    target_version: MajorVersion,

    /// Container RAM in MB; skips the memory probe
    #[arg(long)]
    ram_mb: Option<u64>,

    /// Parallelism passed to pg_upgrade and vacuumdb
    #[arg(long)]
    jobs: Option<usize>,

    /// Give up waiting for the final server after this many seconds
    #[arg(long, value_name = "SECS")]
    readiness_timeout: Option<u64>,

    /// Write a JSON report of the run to this file
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let result = match UpgradeConfig::from_env().context("failed to load upgrade configuration") {
        Ok(config) => run(&cli, config).await,
        Err(err) => Err(err),
    };
    report_outcome(result)
}

/// Print a failure to stderr and turn the outcome into the process exit code
fn report_outcome(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(UpgradeError::ExternalTool { output, .. }) = err.downcast_ref::<UpgradeError>() {
                eprintln!("{}", output.trim_end());
            }
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// Command line flags take precedence over the environment
fn apply_overrides(mut config: UpgradeConfig, cli: &Cli) -> UpgradeConfig {
    if let Some(ram_mb) = cli.ram_mb {
        config = config.ram_mb(ram_mb);
    }
    if let Some(jobs) = cli.jobs {
        config = config.jobs(jobs);
    }
    if let Some(secs) = cli.readiness_timeout {
        let policy = config.readiness.clone().deadline(Duration::from_secs(secs));
        config = config.readiness(policy);
    }
    config
}

async fn run(cli: &Cli, config: UpgradeConfig) -> Result<()> {
    let config = apply_overrides(config, cli);
    config.validate().context("invalid upgrade configuration")?;

    let report = Upgrader::new(config)
        .run(cli.source_version, cli.target_version)
        .await
        .with_context(|| {
            format!(
                "upgrade from {} to {} failed",
                cli.source_version, cli.target_version
            )
        })?;

    if let Some(path) = &cli.report {
        write_report(&report, path)?;
        info!("Report written to {}", path.display());
    }

    Ok(())
}

fn write_report(report: &UpgradeReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pgupgrade=debug,postgresql_upgrade=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
