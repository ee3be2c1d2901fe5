//! Bringing the upgraded cluster online once to rebuild planner statistics

use crate::config::UpgradeConfig;
use crate::core::{MajorVersion, Result};
use crate::layout::VersionDescriptor;
use crate::process::{CommandRunner, ToolCommand};
use crate::readiness::{Ready, ReadinessWaiter};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub version: MajorVersion,
    pub port: u16,
    pub readiness_attempts: u64,
    pub readiness_wait: Duration,
    pub server_exit_code: i32,
}

pub struct PostUpgradeMaintainer<'a> {
    config: &'a UpgradeConfig,
    runner: &'a dyn CommandRunner,
    waiter: &'a ReadinessWaiter,
}

impl<'a> PostUpgradeMaintainer<'a> {
    pub fn new(
        config: &'a UpgradeConfig,
        runner: &'a dyn CommandRunner,
        waiter: &'a ReadinessWaiter,
    ) -> Self {
        Self {
            config,
            runner,
            waiter,
        }
    }

    pub fn server_command(&self, descriptor: &VersionDescriptor) -> Result<ToolCommand> {
        Ok(ToolCommand::new(&descriptor.binaries()?.postgres)
            .arg("-D")
            .path_arg(descriptor.main_dir())
            .arg("-c")
            .arg(format!("config_file={}", descriptor.config_file().display())))
    }

    /// Full `VACUUM ANALYZE` of every database; no `--analyze-in-stages`
    /// since the run waits for complete statistics anyway
    pub fn vacuumdb_command(&self, descriptor: &VersionDescriptor) -> Result<ToolCommand> {
        Ok(ToolCommand::new(&descriptor.binaries()?.vacuumdb)
            .args(["--port".to_string(), descriptor.port().to_string()])
            .arg("--all")
            .arg("--verbose")
            .args(["--jobs".to_string(), self.config.jobs.to_string()]))
    }

    /// Start the final version, refresh statistics, stop it again.
    ///
    /// The server is stopped even when waiting or vacuuming fails; that
    /// failure is what gets returned.
    pub async fn finalize(&self, descriptor: &VersionDescriptor) -> Result<MaintenanceReport> {
        info!("Starting PostgreSQL to run VACUUM ANALYZE...");
        let mut server = self.runner.spawn(&self.server_command(descriptor)?).await?;

        let analyzed = self.analyze(descriptor).await;

        info!("Waiting for PostgreSQL to shut down...");
        let stopped = server.terminate().await;

        let ready = analyzed?;
        let server_exit_code = stopped?;
        if server_exit_code != 0 {
            warn!("PostgreSQL exited with code {} after shutdown request", server_exit_code);
        }

        Ok(MaintenanceReport {
            version: descriptor.version(),
            port: descriptor.port(),
            readiness_attempts: ready.attempts,
            readiness_wait: ready.waited,
            server_exit_code,
        })
    }

    async fn analyze(&self, descriptor: &VersionDescriptor) -> Result<Ready> {
        let ready = self.waiter.wait_until_up(descriptor.port()).await?;

        info!("Running VACUUM ANALYZE...");
        info!("(monitor locks while running that because PostgreSQL might decide to do autovacuum!)");
        self.runner
            .run_checked(&self.vacuumdb_command(descriptor)?)
            .await?;
        Ok(ready)
    }
}
