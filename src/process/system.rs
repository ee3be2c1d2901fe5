use super::{CommandRunner, ServerProcess, ToolCommand, ToolOutput};
use crate::core::{Result, UpgradeError};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Output lines kept for the error message of a failed command
pub const OUTPUT_TAIL_LINES: usize = 200;

/// Runs commands as real child processes
///
/// Output of a running command is forwarded to the log line by line as it
/// arrives; only a bounded tail is kept in memory.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner {
    line_sink: Option<UnboundedSender<String>>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also send every forwarded output line to `sink`
    #[cfg(test)]
    fn with_line_sink(mut self, sink: UnboundedSender<String>) -> Self {
        self.line_sink = Some(sink);
        self
    }

    fn command(tool: &ToolCommand) -> Command {
        let mut command = Command::new(&tool.program);
        command.args(&tool.args);
        if let Some(dir) = &tool.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, tool: &ToolCommand) -> Result<ToolOutput> {
        debug!("Running: {}", tool);
        let mut child = Self::command(tool)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| UpgradeError::io(&tool.program, e))?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(UpgradeError::Environment(format!(
                "output of {} is not piped",
                tool.name()
            )));
        };

        let name = tool.name();
        let tail = Mutex::new(VecDeque::with_capacity(OUTPUT_TAIL_LINES));
        let mut captured = String::new();
        let capture = tool.capture_stdout.then_some(&mut captured);

        tokio::try_join!(
            self.forward(stdout, &name, &tail, capture),
            self.forward(stderr, &name, &tail, None),
        )
        .map_err(|e| UpgradeError::io(&tool.program, e))?;

        let status = child
            .wait()
            .await
            .map_err(|e| UpgradeError::io(&tool.program, e))?;

        let output = match tail.into_inner() {
            Ok(lines) => lines.into_iter().collect::<Vec<_>>().join("\n"),
            Err(poisoned) => poisoned.into_inner().into_iter().collect::<Vec<_>>().join("\n"),
        };

        Ok(ToolOutput {
            exit_code: exit_code(status),
            stdout: captured,
            output,
        })
    }

    async fn spawn(&self, tool: &ToolCommand) -> Result<Box<dyn ServerProcess>> {
        debug!("Spawning: {}", tool);
        let child = Self::command(tool)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| UpgradeError::io(&tool.program, e))?;
        info!("Started {} (pid {:?})", tool.name(), child.id());
        Ok(Box::new(SystemProcess { child }))
    }
}

impl SystemRunner {
    /// Log every line of `reader` as it arrives until the stream closes
    async fn forward<R>(
        &self,
        reader: R,
        name: &str,
        tail: &Mutex<VecDeque<String>>,
        mut capture: Option<&mut String>,
    ) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                return Ok(());
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);

            info!("[{}] {}", name, line);
            if let Some(sink) = &self.line_sink {
                let _ = sink.send(line.to_string());
            }
            if let Some(captured) = capture.as_deref_mut() {
                captured.push_str(line);
                captured.push('\n');
            }
            if let Ok(mut tail) = tail.lock() {
                if tail.len() == OUTPUT_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.to_string());
            }
        }
    }
}

struct SystemProcess {
    child: Child,
}

#[async_trait]
impl ServerProcess for SystemProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self) -> Result<i32> {
        if let Some(raw_pid) = self.child.id() {
            let pid = Pid::from_raw(raw_pid as i32);
            match kill(pid, Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => return Err(e.into()),
            }
        }
        let status = self.child.wait().await.map_err(|e| {
            UpgradeError::Environment(format!("waiting for server process failed: {}", e))
        })?;
        Ok(exit_code(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_exit_code_and_output() {
        let runner = SystemRunner::new();
        let command = ToolCommand::new("/bin/sh").args(["-c", "echo hello; exit 3"]);

        let output = runner.run(&command).await.unwrap();

        assert_eq!(output.exit_code, 3);
        assert!(output.output.contains("hello"));
        assert!(runner.run_checked(&command).await.unwrap_err().is_external_tool());
    }

    #[tokio::test]
    async fn test_stdout_excludes_stderr() {
        let command = ToolCommand::new("/bin/sh")
            .args(["-c", "echo 8192; echo warning >&2"])
            .capture_stdout();

        let output = SystemRunner::new().run_checked(&command).await.unwrap();

        assert_eq!(output.stdout.trim(), "8192");
        assert!(output.output.contains("warning"));
    }

    #[tokio::test]
    async fn test_stdout_not_kept_unless_requested() {
        let command = ToolCommand::new("/bin/sh").args(["-c", "echo 8192"]);

        let output = SystemRunner::new().run_checked(&command).await.unwrap();

        assert!(output.stdout.is_empty());
        assert_eq!(output.output, "8192");
    }

    #[tokio::test]
    async fn test_output_is_forwarded_while_command_runs() {
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
        let runner = SystemRunner::new().with_line_sink(sender);
        let command = ToolCommand::new("/bin/sh").args(["-c", "echo started; sleep 5; echo finished"]);

        let running = tokio::spawn(async move { runner.run(&command).await });

        let first = tokio::time::timeout(std::time::Duration::from_secs(3), receiver.recv())
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("started"));
        assert!(!running.is_finished());

        running.abort();
    }

    #[tokio::test]
    async fn test_output_tail_is_bounded() {
        let script = format!("seq 1 {}", OUTPUT_TAIL_LINES + 50);
        let command = ToolCommand::new("/bin/sh").args(["-c", script.as_str()]);

        let output = SystemRunner::new().run_checked(&command).await.unwrap();

        let lines: Vec<&str> = output.output.lines().collect();
        assert_eq!(lines.len(), OUTPUT_TAIL_LINES);
        assert_eq!(lines[0], "51");
        assert_eq!(lines.last().copied(), Some("250"));
    }

    #[tokio::test]
    async fn test_run_honours_working_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let command = ToolCommand::new("/bin/sh")
            .args(["-c", "touch marker"])
            .current_dir(temp_dir.path());

        SystemRunner::new().run_checked(&command).await.unwrap();

        assert!(temp_dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let command = ToolCommand::new("/nonexistent/initdb");
        let err = SystemRunner::new().run(&command).await.unwrap_err();
        assert!(matches!(err, UpgradeError::Io { .. }));
    }

    #[tokio::test]
    async fn test_spawned_process_terminates_on_sigterm() {
        let command = ToolCommand::new("/bin/sleep").arg("30");
        let mut process = SystemRunner::new().spawn(&command).await.unwrap();
        assert!(process.id().is_some());

        let code = process.terminate().await.unwrap();

        assert_eq!(code, -1);
    }
}
