// ============================================================================
// External Process Execution
// ============================================================================
//
// Every PostgreSQL binary (initdb, pg_upgrade, postgres, vacuumdb) and every
// helper script is driven through the `CommandRunner` trait. Orchestration
// code builds `ToolCommand` values and never touches `std::process` directly,
// so tests can swap in a recording runner and assert exact argument vectors.
//
// ============================================================================

pub mod system;

use crate::core::{Result, UpgradeError};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

pub use system::SystemRunner;

/// A fully specified external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Keep the whole standard output in [`ToolOutput::stdout`]
    pub capture_stdout: bool,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            capture_stdout: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Path-valued argument, rendered lossily
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// For commands whose answer gets parsed; everything else is only streamed
    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    /// File name of the program, used in log lines
    pub fn name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Exit status and captured output of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutput {
    pub exit_code: i32,
    /// Full standard output; empty unless the command asked for capture
    pub stdout: String,
    /// Last lines of standard output and standard error, interleaved
    pub output: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a nonzero exit into [`UpgradeError::ExternalTool`]
    pub fn ensure_success(self, command: &ToolCommand) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(UpgradeError::ExternalTool {
                command: command.to_string(),
                exit_code: self.exit_code,
                output: self.output,
            })
        }
    }
}

/// Narrow process-execution capability used by the whole orchestration
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput>;

    /// Start a long-running process (a database server) under supervision
    async fn spawn(&self, command: &ToolCommand) -> Result<Box<dyn ServerProcess>>;

    /// Run a command and fail unless it exits with code 0
    async fn run_checked(&self, command: &ToolCommand) -> Result<ToolOutput> {
        self.run(command).await?.ensure_success(command)
    }
}

/// Handle to a process started with [`CommandRunner::spawn`]
#[async_trait]
pub trait ServerProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Ask the process to shut down (SIGTERM) and wait for it to exit.
    ///
    /// Returns the exit code; a process killed by a signal reports -1.
    async fn terminate(&mut self) -> Result<i32>;
}

/// Name of the effective user of this process
pub fn current_user() -> Result<String> {
    let uid = nix::unistd::geteuid();
    match nix::unistd::User::from_uid(uid)? {
        Some(user) => Ok(user.name),
        None => Err(UpgradeError::Environment(format!(
            "no passwd entry for effective uid {}",
            uid
        ))),
    }
}
