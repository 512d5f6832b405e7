//! Subprocess-backed step execution.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use greenloop_core::process::{run_with_timeout, StreamMode};
use greenloop_core::{CheckResult, CheckStep, StepExecutor};

/// Runs each step as a child process inside the repository.
#[derive(Debug, Clone)]
pub struct ProcessStepExecutor {
    work_dir: PathBuf,
}

impl ProcessStepExecutor {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

#[async_trait]
impl StepExecutor for ProcessStepExecutor {
    async fn execute(&self, step: &CheckStep) -> CheckResult {
        let output = run_with_timeout(
            &step.command,
            &step.args,
            &self.work_dir,
            step.timeout(),
            StreamMode::Capture,
        )
        .await;

        match output {
            Ok(output) => {
                if output.timed_out {
                    warn!(step = %step.name, timeout_secs = step.timeout_secs, "check timed out");
                }
                debug!(step = %step.name, exit_code = output.exit_code, duration_ms = output.duration_ms, "check finished");
                CheckResult {
                    step_name: step.name.clone(),
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    duration_ms: output.duration_ms,
                    timed_out: output.timed_out,
                }
            }
            // A step that cannot start is a failed step the fix agent gets to see.
            Err(err) => {
                warn!(step = %step.name, command = %step.command, error = %err, "failed to start check");
                CheckResult {
                    step_name: step.name.clone(),
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("failed to start `{}`: {err}", step.command_line()),
                    duration_ms: 0,
                    timed_out: false,
                }
            }
        }
    }
}
