//! Local verification steps and their results.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_timeout_secs() -> u64 {
    600
}

/// A named verification step. Immutable once handed to the runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckStep {
    /// Human-readable step name (e.g. "lint", "test").
    pub name: String,

    /// Executable to run.
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Timeout in seconds; the child is killed when it elapses.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl CheckStep {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The full command line, for logs and prompts.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of executing one [`CheckStep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    /// Step name.
    pub step_name: String,

    /// Exit code (0 = success, -1 = killed or never started).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether the step was killed by its timeout.
    pub timed_out: bool,
}

impl CheckResult {
    /// Whether this step passed (exit code 0, not timed out).
    pub fn passed(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Combined failure text used for fingerprinting and prompts.
    pub fn failure_text(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => format!("step '{}' exited with code {}", self.step_name, self.exit_code),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i32, stdout: &str, stderr: &str) -> CheckResult {
        CheckResult {
            step_name: "lint".to_string(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration_ms: 10,
            timed_out: false,
        }
    }

    #[test]
    fn test_check_result_passed() {
        assert!(result(0, "", "").passed());
        assert!(!result(1, "", "boom").passed());

        let mut timed_out = result(0, "", "");
        timed_out.timed_out = true;
        assert!(!timed_out.passed());
    }

    #[test]
    fn test_failure_text_prefers_available_streams() {
        assert_eq!(result(1, "", "boom").failure_text(), "boom");
        assert_eq!(result(1, "out", "err").failure_text(), "out\nerr");
        assert!(result(2, "", "").failure_text().contains("exited with code 2"));
    }

    #[test]
    fn test_command_line_joins_args() {
        let step = CheckStep::new("lint", "npm", ["run", "lint"]);
        assert_eq!(step.command_line(), "npm run lint");
        assert_eq!(step.timeout_secs, 600);
    }

    #[test]
    fn test_check_step_toml_defaults() {
        let step: CheckStep = toml::from_str("name = \"test\"\ncommand = \"cargo\"").unwrap();
        assert!(step.args.is_empty());
        assert_eq!(step.timeout(), Duration::from_secs(600));
    }
}
