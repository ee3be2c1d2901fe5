// ============================================================================
// pgupgrade Library
// ============================================================================
//
// Upgrades a PostgreSQL cluster across several major versions in place, one
// version at a time, by driving initdb, pg_upgrade, postgres and vacuumdb.

pub mod config;
pub mod core;
pub mod executor;
pub mod facade;
pub mod layout;
pub mod maintenance;
pub mod plan;
pub mod process;
pub mod readiness;

// Re-export main types for convenience
pub use config::UpgradeConfig;
pub use core::{MajorVersion, Result, UpgradeError, VersionRole};
pub use facade::{UpgradeReport, Upgrader};

pub use executor::{HopReport, HopState};
pub use maintenance::MaintenanceReport;
pub use plan::{UpgradeChain, VersionPair};
pub use process::{CommandRunner, ServerProcess, SystemRunner, ToolCommand, ToolOutput};
pub use readiness::{ConnectProbe, ReadinessPolicy, ReadinessWaiter, TcpProbe};
