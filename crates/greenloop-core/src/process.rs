//! Subprocess execution raced against a timeout.
//!
//! Every child is spawned with `kill_on_drop`, so dropping the future (timeout
//! or cancellation) kills the process instead of leaving it running.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::warn;

/// Captured output of a finished (or killed) subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; -1 when killed by signal or timeout.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// How the child's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Capture stdout/stderr into [`ProcessOutput`].
    Capture,
    /// Inherit the terminal; nothing is captured.
    Inherit,
}

/// Run `program args...` in `cwd`, killing it if `timeout` elapses.
///
/// Spawn errors (e.g. binary not on PATH) are returned as `Err`; a non-zero
/// exit status is a normal `Ok` result.
pub async fn run_with_timeout(
    program: &str,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
    streams: StreamMode,
) -> std::io::Result<ProcessOutput> {
    let start = Instant::now();

    let mut command = Command::new(program);
    command.args(args).current_dir(cwd).kill_on_drop(true);
    match streams {
        StreamMode::Capture => {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }
        StreamMode::Inherit => {
            command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }
    }

    let child = command.spawn()?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            Ok(ProcessOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                duration_ms: start.elapsed().as_millis() as u64,
                timed_out: false,
            })
        }
        Err(_) => {
            // The future owning the child was dropped, which kills it.
            warn!(program, timeout_secs = timeout.as_secs(), "process timed out and was killed");
            Ok(ProcessOutput {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("{program} timed out after {} seconds", timeout.as_secs()),
                duration_ms: start.elapsed().as_millis() as u64,
                timed_out: true,
            })
        }
    }
}
