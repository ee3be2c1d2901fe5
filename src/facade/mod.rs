pub mod upgrader;

pub use upgrader::{UpgradeReport, Upgrader};
