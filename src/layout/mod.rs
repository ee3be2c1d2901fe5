//! On-disk layout of a multi-version PostgreSQL installation

pub mod conf;
pub mod descriptor;
pub mod preflight;

pub use conf::ConfigGenerator;
pub use descriptor::{ToolBinaries, VersionDescriptor};
pub use preflight::PreflightValidator;
