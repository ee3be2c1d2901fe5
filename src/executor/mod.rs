pub mod hop;
pub mod state;

pub use hop::{UPGRADE_BYPRODUCTS, UpgradeExecutor, clean_stale_byproducts};
pub use state::{HopProgress, HopReport, HopState};
