// ============================================================================
// Hop State Management
// ============================================================================
//
// Each hop walks a strictly linear lifecycle. The only irreversible step,
// deleting the superseded data directory, is reachable solely from
// `Upgraded`, i.e. after pg_upgrade reported success in real mode.
//
// ============================================================================

use crate::core::{MajorVersion, Result, UpgradeError};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Hop lifecycle
///
/// State transitions:
/// ```text
/// Planned ──initdb──> Initialized ──pg_upgrade --check──> CompatibilityChecked
///                                                                │
///            SupersededDataPurged <──rm -rf old──  Upgraded <──pg_upgrade
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HopState {
    /// Descriptors built, nothing executed
    Planned,

    /// New cluster created by initdb
    Initialized,

    /// `pg_upgrade --check` passed
    CompatibilityChecked,

    /// `pg_upgrade` finished successfully
    Upgraded,

    /// Old data directory deleted
    SupersededDataPurged,
}

impl HopState {
    /// The only state this one may move to
    pub fn next(&self) -> Option<HopState> {
        match self {
            HopState::Planned => Some(HopState::Initialized),
            HopState::Initialized => Some(HopState::CompatibilityChecked),
            HopState::CompatibilityChecked => Some(HopState::Upgraded),
            HopState::Upgraded => Some(HopState::SupersededDataPurged),
            HopState::SupersededDataPurged => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HopState::SupersededDataPurged)
    }

    /// Old data may be deleted only once the upgrade itself has succeeded
    pub fn allows_purge(&self) -> bool {
        matches!(self, HopState::Upgraded)
    }
}

impl fmt::Display for HopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HopState::Planned => write!(f, "PLANNED"),
            HopState::Initialized => write!(f, "INITIALIZED"),
            HopState::CompatibilityChecked => write!(f, "COMPATIBILITY_CHECKED"),
            HopState::Upgraded => write!(f, "UPGRADED"),
            HopState::SupersededDataPurged => write!(f, "SUPERSEDED_DATA_PURGED"),
        }
    }
}

/// Tracks one hop through its lifecycle
#[derive(Debug, Clone)]
pub struct HopProgress {
    old_version: MajorVersion,
    new_version: MajorVersion,
    history: Vec<HopState>,
}

impl HopProgress {
    pub fn new(old_version: MajorVersion, new_version: MajorVersion) -> Self {
        Self {
            old_version,
            new_version,
            history: vec![HopState::Planned],
        }
    }

    pub fn state(&self) -> HopState {
        self.history.last().copied().unwrap_or(HopState::Planned)
    }

    pub fn history(&self) -> &[HopState] {
        &self.history
    }

    /// Move one step forward; anything else is rejected
    pub fn advance(&mut self, to: HopState) -> Result<()> {
        let from = self.state();
        if from.next() != Some(to) {
            return Err(UpgradeError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.history.push(to);
        Ok(())
    }

    /// Gate for the destructive purge
    pub fn ensure_purge_allowed(&self) -> Result<()> {
        let state = self.state();
        if state.allows_purge() {
            Ok(())
        } else {
            Err(UpgradeError::InvalidTransition {
                from: state.to_string(),
                to: HopState::SupersededDataPurged.to_string(),
            })
        }
    }

    pub fn into_report(
        self,
        purged_data_dir: PathBuf,
        removed_byproducts: Vec<PathBuf>,
    ) -> HopReport {
        HopReport {
            old_version: self.old_version,
            new_version: self.new_version,
            states: self.history,
            purged_data_dir,
            removed_byproducts,
        }
    }
}

/// What a completed hop did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HopReport {
    pub old_version: MajorVersion,
    pub new_version: MajorVersion,
    pub states: Vec<HopState>,
    pub purged_data_dir: PathBuf,
    pub removed_byproducts: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let mut progress = HopProgress::new(11, 12);
        for state in [
            HopState::Initialized,
            HopState::CompatibilityChecked,
            HopState::Upgraded,
        ] {
            progress.advance(state).unwrap();
        }
        progress.ensure_purge_allowed().unwrap();
        progress.advance(HopState::SupersededDataPurged).unwrap();

        assert!(progress.state().is_terminal());
        assert_eq!(progress.history().len(), 5);
    }

    #[test]
    fn test_cannot_skip_states() {
        let mut progress = HopProgress::new(11, 12);
        let err = progress.advance(HopState::Upgraded).unwrap_err();
        assert!(matches!(err, UpgradeError::InvalidTransition { .. }));
        assert_eq!(progress.state(), HopState::Planned);
    }

    #[test]
    fn test_purge_only_after_upgrade() {
        let mut progress = HopProgress::new(11, 12);
        assert!(progress.ensure_purge_allowed().is_err());
        progress.advance(HopState::Initialized).unwrap();
        assert!(progress.ensure_purge_allowed().is_err());
        progress.advance(HopState::CompatibilityChecked).unwrap();
        assert!(progress.ensure_purge_allowed().is_err());
        progress.advance(HopState::Upgraded).unwrap();
        assert!(progress.ensure_purge_allowed().is_ok());
    }

    #[test]
    fn test_terminal_state_has_no_successor() {
        assert_eq!(HopState::SupersededDataPurged.next(), None);
        assert_eq!(HopState::Planned.to_string(), "PLANNED");
    }
}
