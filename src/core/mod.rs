pub mod error;
pub mod fs;
pub mod types;

pub use error::{Result, UpgradeError};
pub use types::{MajorVersion, PortAllocator, VersionRole};
