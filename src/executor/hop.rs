use super::state::{HopProgress, HopReport, HopState};
use crate::config::UpgradeConfig;
use crate::core::fs::{
    create_dir_all, remove_dir_all_if_exists, remove_file_if_exists, remove_matching_files,
};
use crate::core::Result;
use crate::layout::VersionDescriptor;
use crate::plan::VersionPair;
use crate::process::{CommandRunner, ToolCommand};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Files pg_upgrade leaves in its working directory after a successful run
pub const UPGRADE_BYPRODUCTS: [&str; 5] = [
    "analyze_new_cluster.sh",
    "delete_old_cluster.sh",
    "pg_upgrade_internal.log",
    "pg_upgrade_server.log",
    "pg_upgrade_utility.log",
];

lazy_static! {
    /// Leftovers of an interrupted pg_upgrade run: `pg_*.log`, `pg_*.custom`
    /// and the globals dump
    static ref STALE_BYPRODUCTS: Regex =
        Regex::new(r"^(pg_.*\.(log|custom)|pg_upgrade_dump_globals\.sql)$").unwrap();
}

pub const INITDB_ENCODING: &str = "UTF-8";
pub const INITDB_LOCALE: &str = "en_US.UTF-8";

/// Remove files a previous, failed attempt left in the data root
pub fn clean_stale_byproducts(data_root: &Path) -> Result<Vec<PathBuf>> {
    let removed = remove_matching_files(data_root, &STALE_BYPRODUCTS)?;
    for path in &removed {
        debug!("Deleted {}", path.display());
    }
    Ok(removed)
}

/// Runs a single hop of the chain
pub struct UpgradeExecutor<'a> {
    config: &'a UpgradeConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> UpgradeExecutor<'a> {
    pub fn new(config: &'a UpgradeConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    pub fn initdb_command(&self, new: &VersionDescriptor) -> Result<ToolCommand> {
        Ok(ToolCommand::new(&new.binaries()?.initdb)
            .arg("--pgdata")
            .path_arg(new.main_dir())
            .arg("--data-checksums")
            .args(["--encoding", INITDB_ENCODING])
            .args(["--lc-collate", INITDB_LOCALE])
            .args(["--lc-ctype", INITDB_LOCALE]))
    }

    /// pg_upgrade invocation in real mode; `--check` is appended for the dry run
    pub fn upgrade_command(&self, pair: &VersionPair) -> Result<ToolCommand> {
        let (old, new) = (&pair.old, &pair.new);
        Ok(ToolCommand::new(&new.binaries()?.pg_upgrade)
            .args(["--jobs".to_string(), self.config.jobs.to_string()])
            .arg("--old-bindir")
            .path_arg(old.bin_dir())
            .arg("--new-bindir")
            .path_arg(new.bin_dir())
            .arg("--old-datadir")
            .path_arg(old.main_dir())
            .arg("--new-datadir")
            .path_arg(new.main_dir())
            .args(["--old-port".to_string(), old.port().to_string()])
            .args(["--new-port".to_string(), new.port().to_string()])
            .args(["--old-options".to_string(), server_options(old)])
            .args(["--new-options".to_string(), server_options(new)])
            .arg("--link")
            .arg("--verbose")
            .current_dir(&self.config.data_root))
    }

    /// initdb, check, upgrade, purge the old version, tidy up.
    ///
    /// Any failing tool aborts the hop before the old data is touched.
    pub async fn run_hop(&self, pair: &VersionPair) -> Result<HopReport> {
        let (old, new) = (&pair.old, &pair.new);
        let mut progress = HopProgress::new(old.version(), new.version());
        info!("Upgrading from {} to {}...", old.version(), new.version());

        info!("Running initdb...");
        create_dir_all(new.main_dir())?;
        self.runner.run_checked(&self.initdb_command(new)?).await?;
        progress.advance(HopState::Initialized)?;

        let upgrade = self.upgrade_command(pair)?;

        info!("Testing if clusters are compatible...");
        self.runner
            .run_checked(&upgrade.clone().arg("--check"))
            .await?;
        progress.advance(HopState::CompatibilityChecked)?;

        info!("Upgrading...");
        self.runner.run_checked(&upgrade).await?;
        progress.advance(HopState::Upgraded)?;

        info!("Cleaning up old data directory...");
        progress.ensure_purge_allowed()?;
        remove_dir_all_if_exists(old.data_dir())?;
        progress.advance(HopState::SupersededDataPurged)?;

        info!("Cleaning up scripts...");
        let mut removed = Vec::new();
        for name in UPGRADE_BYPRODUCTS {
            let path = self.config.data_root.join(name);
            if remove_file_if_exists(&path)? {
                removed.push(path);
            }
        }

        info!("Done upgrading from {} to {}", old.version(), new.version());
        Ok(progress.into_report(old.data_dir().to_path_buf(), removed))
    }
}

fn server_options(descriptor: &VersionDescriptor) -> String {
    format!(" -c config_file={}", descriptor.config_file().display())
}
