use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Command `{command}` failed with exit code {exit_code}")]
    ExternalTool {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("Server on port {port} did not accept connections within {waited:?}")]
    ReadinessTimeout { port: u16, waited: Duration },

    #[error("Invalid hop transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, UpgradeError>;

impl UpgradeError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn is_environment(&self) -> bool {
        matches!(self, Self::Environment(_))
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }

    pub fn is_external_tool(&self) -> bool {
        matches!(self, Self::ExternalTool { .. })
    }
}

impl From<nix::Error> for UpgradeError {
    fn from(err: nix::Error) -> Self {
        Self::Environment(format!("system call failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_tool_message_names_command() {
        let err = UpgradeError::ExternalTool {
            command: "/usr/lib/postgresql/12/bin/pg_upgrade --check".to_string(),
            exit_code: 1,
            output: String::new(),
        };
        let message = err.to_string();
        assert!(message.contains("pg_upgrade --check"));
        assert!(message.contains("exit code 1"));
        assert!(err.is_external_tool());
    }

    #[test]
    fn test_io_error_names_path() {
        let err = UpgradeError::io(
            "/var/lib/postgresql/11",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/var/lib/postgresql/11"));
    }
}
