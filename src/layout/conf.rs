//! Per-version configuration overlays
//!
//! Each descriptor gets its own copy of the active configuration set with
//! the settings that must differ between concurrently configured clusters
//! (port, data directory, PID file, ...) pinned at the end of
//! `postgresql.conf`.

use crate::config::UpgradeConfig;
use crate::core::fs::{copy_tree, remove_dir_all_if_exists};
use crate::core::{MajorVersion, Result, UpgradeError};
use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const POSTGRESQL_CONF: &str = "postgresql.conf";

lazy_static! {
    /// `key = value` or `key value`; the `=` is optional in postgresql.conf
    static ref DIRECTIVE_KEY: Regex =
        Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(=|\s+\S)").unwrap();
}

pub struct ConfigGenerator<'a> {
    config: &'a UpgradeConfig,
}

impl<'a> ConfigGenerator<'a> {
    pub fn new(config: &'a UpgradeConfig) -> Self {
        Self { config }
    }

    /// The one configuration set currently installed under `conf_root`
    pub fn active_config_dir(&self) -> Result<PathBuf> {
        let conf_root = &self.config.conf_root;
        let entries = fs::read_dir(conf_root).map_err(|e| {
            UpgradeError::Environment(format!(
                "Unable to list configuration sets in {}: {}",
                conf_root.display(),
                e
            ))
        })?;

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| UpgradeError::io(conf_root, e))?;
            candidates.push(entry.file_name().to_string_lossy().into_owned());
        }
        candidates.sort();

        if candidates.len() != 1 {
            return Err(UpgradeError::Environment(format!(
                "More / less than one PostgreSQL configuration set has been found in {}: {:?}",
                conf_root.display(),
                candidates
            )));
        }

        let current = &candidates[0];
        if current.is_empty() || !current.chars().all(|c| c.is_ascii_digit()) {
            return Err(UpgradeError::Environment(format!(
                "Invalid PostgreSQL version: {}",
                current
            )));
        }

        let active = conf_root.join(current).join("main");
        if !active.join(POSTGRESQL_CONF).is_file() {
            return Err(UpgradeError::Environment(format!(
                "{} does not exist in {}.",
                POSTGRESQL_CONF,
                active.display()
            )));
        }

        Ok(active)
    }

    /// Settings pinned for `version` listening on `port`, in file order
    pub fn overrides(
        &self,
        version: MajorVersion,
        port: u16,
        conf_dir: &Path,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("port", port.to_string()),
            ("data_directory", quote(&self.config.main_dir(version))),
            ("hba_file", quote(&conf_dir.join("pg_hba.conf"))),
            ("ident_file", quote(&conf_dir.join("pg_ident.conf"))),
            (
                "external_pid_file",
                quote(&self.config.external_pid_file(version)),
            ),
            ("cluster_name", format!("'{}/main'", version)),
            (
                "stats_temp_directory",
                quote(&self.config.stats_temp_dir(version)),
            ),
        ]
    }

    /// Recreate the overlay directory for (`version`, `port`) and return it.
    ///
    /// `extra_directives` are appended verbatim after the pinned settings.
    pub fn generate(
        &self,
        version: MajorVersion,
        port: u16,
        extra_directives: &[String],
    ) -> Result<PathBuf> {
        info!("Creating temporary configuration for version {}...", version);

        let active = self.active_config_dir()?;
        let conf_dir = self.config.tmp_conf_dir(version, port);
        if remove_dir_all_if_exists(&conf_dir)? {
            debug!("Cleaned up stale {}", conf_dir.display());
        }
        copy_tree(&active, &conf_dir)?;

        let overrides = self.overrides(version, port, &conf_dir);
        let mut keys: Vec<String> = overrides.iter().map(|(key, _)| key.to_string()).collect();
        keys.extend(extra_directives.iter().filter_map(|line| directive_key(line)));

        let conf_path = conf_dir.join(POSTGRESQL_CONF);
        let original =
            fs::read_to_string(&conf_path).map_err(|e| UpgradeError::io(&conf_path, e))?;

        let mut rendered = comment_out_keys(&original, &keys);
        if !rendered.ends_with('\n') {
            rendered.push('\n');
        }
        rendered.push_str(&format!("\n# pgupgrade overrides for version {}\n", version));
        for (key, value) in &overrides {
            rendered.push_str(&format!("{} = {}\n", key, value));
        }
        for line in extra_directives {
            rendered.push_str(line);
            rendered.push('\n');
        }

        fs::write(&conf_path, rendered).map_err(|e| UpgradeError::io(&conf_path, e))?;
        debug!("Wrote {}", conf_path.display());
        Ok(conf_dir)
    }
}

fn quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}

/// Setting name of an assignment line
fn directive_key(line: &str) -> Option<String> {
    DIRECTIVE_KEY
        .captures(line)
        .map(|caps| caps[1].to_ascii_lowercase())
}

/// Comment out every active assignment of one of `keys`
fn comment_out_keys(contents: &str, keys: &[String]) -> String {
    if keys.is_empty() {
        return contents.to_string();
    }
    let alternatives = keys
        .iter()
        .map(|key| regex::escape(key))
        .collect::<Vec<_>>()
        .join("|");
    let Ok(assignment) = Regex::new(&format!(r"(?i)^\s*({})\s*(=|\s+\S)", alternatives)) else {
        return contents.to_string();
    };

    contents
        .lines()
        .map(|line| {
            if assignment.is_match(line) {
                format!("# overridden by pgupgrade: {}", line.trim_start())
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
