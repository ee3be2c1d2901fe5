use crate::config::UpgradeConfig;
use crate::core::{MajorVersion, Result, UpgradeError};
use crate::executor::{HopReport, UpgradeExecutor, clean_stale_byproducts};
use crate::layout::PreflightValidator;
use crate::maintenance::{MaintenanceReport, PostUpgradeMaintainer};
use crate::plan::{PairSequencer, UpgradeChain};
use crate::process::{CommandRunner, SystemRunner, ToolCommand, current_user};
use crate::readiness::{ConnectProbe, ReadinessWaiter};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Summary of a completed upgrade run
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeReport {
    pub source_version: MajorVersion,
    pub target_version: MajorVersion,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ram_mb: u64,
    pub removed_stale_byproducts: Vec<PathBuf>,
    pub hops: Vec<HopReport>,
    pub maintenance: MaintenanceReport,
}

/// Upgrade orchestrator
///
/// Runs preflight checks, plans the whole chain, executes every hop in order
/// and finishes with a statistics refresh on the final version.
///
/// # Examples
///
/// ```no_run
/// use pgupgrade::{UpgradeConfig, Upgrader};
///
/// # async fn example() -> pgupgrade::Result<()> {
/// let upgrader = Upgrader::new(UpgradeConfig::from_env()?);
/// let report = upgrader.run(11, 13).await?;
/// println!("{} hops done", report.hops.len());
/// # Ok(())
/// # }
/// ```
pub struct Upgrader {
    config: UpgradeConfig,
    runner: Arc<dyn CommandRunner>,
    waiter: ReadinessWaiter,
    invoking_user: Option<String>,
}

impl Upgrader {
    /// Orchestrator driving real processes and real TCP probes
    pub fn new(config: UpgradeConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner::new()))
    }

    pub fn with_runner(config: UpgradeConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let waiter = ReadinessWaiter::new(config.readiness.clone());
        Self {
            config,
            runner,
            waiter,
            invoking_user: None,
        }
    }

    /// Replace the TCP probe used to detect the final server
    pub fn with_probe(mut self, probe: Arc<dyn ConnectProbe>) -> Self {
        self.waiter = ReadinessWaiter::with_probe(self.config.readiness.clone(), probe);
        self
    }

    /// Pretend to run as `user` instead of looking up the effective UID
    pub fn invoking_user(mut self, user: &str) -> Self {
        self.invoking_user = Some(user.to_string());
        self
    }

    fn resolve_invoking_user(&self) -> Result<String> {
        match &self.invoking_user {
            Some(user) => Ok(user.clone()),
            None => current_user(),
        }
    }

    /// Container memory limit in MB, from the config or the memory probe
    pub async fn total_ram_mb(&self) -> Result<u64> {
        if let Some(ram_mb) = self.config.ram_mb {
            return Ok(ram_mb);
        }

        let probe = ToolCommand::new(&self.config.memory_probe).capture_stdout();
        let output = self.runner.run_checked(&probe).await?;
        let ram_mb: u64 = output.stdout.trim().parse().map_err(|_| {
            UpgradeError::Environment(format!(
                "{} printed an invalid memory size: '{}'",
                self.config.memory_probe.display(),
                output.stdout.trim()
            ))
        })?;
        if ram_mb == 0 {
            return Err(UpgradeError::Environment("RAM size can't be zero.".to_string()));
        }
        Ok(ram_mb)
    }

    /// Build (and validate) every hop without executing anything
    pub fn plan(
        &self,
        source: MajorVersion,
        target: MajorVersion,
        total_ram_mb: u64,
    ) -> Result<UpgradeChain> {
        PairSequencer::new(&self.config).build_chain(source, target, total_ram_mb)
    }

    /// Upgrade the cluster from `source` to `target`, one major version at a time.
    ///
    /// A failure in the middle of the chain leaves earlier hops committed (their
    /// old data already deleted); the run cannot be resumed automatically.
    pub async fn run(&self, source: MajorVersion, target: MajorVersion) -> Result<UpgradeReport> {
        let started_at = Utc::now();

        let user = self.resolve_invoking_user()?;
        PreflightValidator::from_config(&self.config).validate(source, target, &user)?;

        if let Some(hook) = &self.config.pre_upgrade_hook {
            info!("Running pre-upgrade hook {}...", hook.display());
            self.runner.run_checked(&ToolCommand::new(hook)).await?;
        }

        let removed_stale_byproducts = clean_stale_byproducts(&self.config.data_root)?;
        debug!("Removed {} stale byproduct(s)", removed_stale_byproducts.len());

        let ram_mb = self.total_ram_mb().await?;
        let chain = self.plan(source, target, ram_mb)?;

        let executor = UpgradeExecutor::new(&self.config, self.runner.as_ref());
        let mut hops = Vec::with_capacity(chain.len());
        for pair in chain.pairs() {
            hops.push(executor.run_hop(pair).await?);
        }

        let final_version = chain.final_version().ok_or_else(|| {
            UpgradeError::Precondition("Upgrade chain is empty.".to_string())
        })?;
        let maintainer = PostUpgradeMaintainer::new(&self.config, self.runner.as_ref(), &self.waiter);
        let maintenance = maintainer.finalize(final_version).await?;

        info!("Done!");
        Ok(UpgradeReport {
            source_version: source,
            target_version: target,
            started_at,
            finished_at: Utc::now(),
            ram_mb,
            removed_stale_byproducts,
            hops,
            maintenance,
        })
    }
}
