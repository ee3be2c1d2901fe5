use serde::Serialize;
use std::fmt;

use super::{Result, UpgradeError};

/// PostgreSQL major version number (e.g. 11, 12, 13)
pub type MajorVersion = u32;

/// Position of a version inside the upgrade chain
///
/// Decides which preconditions a descriptor checks when it is built:
/// ```text
/// Source ──hop──> Target
/// Intermediate ──hop──> Target
/// ```
/// Every version after the first appears twice: once as the `Target` of the
/// hop that creates it and once as the `Intermediate` side of the next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionRole {
    /// First version of the chain; must be an existing, stopped cluster
    Source,

    /// Old side of a later hop; its data is produced by the previous hop
    Intermediate,

    /// New side of a hop; its data directory must not exist yet
    Target,
}

impl VersionRole {
    pub fn is_target(&self) -> bool {
        matches!(self, VersionRole::Target)
    }
}

impl fmt::Display for VersionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRole::Source => write!(f, "source"),
            VersionRole::Intermediate => write!(f, "intermediate"),
            VersionRole::Target => write!(f, "target"),
        }
    }
}

/// Hands out listening ports two at a time, one per side of a hop
///
/// The counter only moves forward, so a server left over from an earlier hop
/// never shares a port with a later one.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    /// `None` once the counter has run past `u16::MAX`
    next: Option<u16>,
}

impl PortAllocator {
    pub fn new(base: u16) -> Self {
        Self { next: Some(base) }
    }

    /// Reserve the (old, new) port pair for the next hop
    pub fn next_pair(&mut self) -> Result<(u16, u16)> {
        let exhausted = || UpgradeError::Config("port range exhausted".to_string());
        let old = self.next.ok_or_else(exhausted)?;
        let new = old.checked_add(1).ok_or_else(exhausted)?;
        self.next = new.checked_add(1);
        Ok((old, new))
    }
}
