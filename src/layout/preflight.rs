use crate::config::UpgradeConfig;
use crate::core::fs::dir_accessible;
use crate::core::{MajorVersion, Result, UpgradeError};
use std::path::PathBuf;
use tracing::debug;

/// Cluster-wide checks run before anything is created or deleted
#[derive(Debug, Clone)]
pub struct PreflightValidator {
    data_root: PathBuf,
    expected_user: String,
}

impl PreflightValidator {
    pub fn new(data_root: impl Into<PathBuf>, expected_user: &str) -> Self {
        Self {
            data_root: data_root.into(),
            expected_user: expected_user.to_string(),
        }
    }

    pub fn from_config(config: &UpgradeConfig) -> Self {
        Self::new(&config.data_root, &config.service_user)
    }

    /// Read-only; the version order is checked before the filesystem is touched.
    pub fn validate(
        &self,
        source: MajorVersion,
        target: MajorVersion,
        invoking_user: &str,
    ) -> Result<()> {
        debug!("Source version: {}; target version: {}", source, target);

        if target <= source {
            return Err(UpgradeError::Precondition(format!(
                "Target version {} is not newer than source version {}.",
                target, source
            )));
        }

        if !dir_accessible(&self.data_root) {
            return Err(UpgradeError::Environment(format!(
                "{} does not exist or is inaccessible.",
                self.data_root.display()
            )));
        }

        if invoking_user != self.expected_user {
            return Err(UpgradeError::Environment(format!(
                "This upgrade is to be run as '{}' user, not '{}'.",
                self.expected_user, invoking_user
            )));
        }

        Ok(())
    }
}
