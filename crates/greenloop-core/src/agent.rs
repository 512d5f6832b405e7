//! Fix-agent client.
//!
//! The agent is a black box that edits the working tree. [`CommandFixAgent`]
//! drives a CLI agent (by default `claude`) as a subprocess.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::FixMode;
use crate::error::{RemediationError, Result};
use crate::process::{run_with_timeout, StreamMode};

/// A single request to the fix agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    pub prompt: String,
    pub mode: FixMode,
    /// Interactive requests inherit the terminal instead of capturing output.
    pub interactive: bool,
}

/// Raw output of one agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Fix-agent backend.
#[async_trait]
pub trait FixAgent: Send + Sync {
    /// Invoke the agent. Callers bound this with a timeout and drop the
    /// future on expiry, so implementations must not detach work.
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentOutput>;

    /// Cheap liveness probe used by the startup preflight.
    async fn probe(&self) -> Result<()>;
}

/// Configuration for [`CommandFixAgent`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable.
    pub program: String,
    /// Flag that makes the agent run non-interactively with a prompt.
    pub print_flag: String,
    /// Flag used to pass the model name.
    pub model_flag: String,
    pub cheap_model: String,
    pub expensive_model: String,
    /// Extra arguments appended to every invocation.
    pub extra_args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            print_flag: "-p".to_string(),
            model_flag: "--model".to_string(),
            cheap_model: "sonnet".to_string(),
            expensive_model: "opus".to_string(),
            extra_args: vec!["--permission-mode".to_string(), "acceptEdits".to_string()],
        }
    }
}

impl AgentConfig {
    /// Argument vector for a request, prompt last.
    pub fn args_for(&self, request: &AgentRequest) -> Vec<String> {
        let model = match request.mode {
            FixMode::Cheap => &self.cheap_model,
            FixMode::Expensive => &self.expensive_model,
        };

        let mut args = Vec::new();
        if !self.model_flag.is_empty() && !model.is_empty() {
            args.push(self.model_flag.clone());
            args.push(model.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        if !request.interactive && !self.print_flag.is_empty() {
            args.push(self.print_flag.clone());
        }
        args.push(request.prompt.clone());
        args
    }
}

/// Runs a CLI fix agent in the repository directory.
#[derive(Debug, Clone)]
pub struct CommandFixAgent {
    config: AgentConfig,
    work_dir: PathBuf,
}

impl CommandFixAgent {
    pub fn new(config: AgentConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            work_dir: work_dir.into(),
        }
    }
}

/// Upper bound for a single invocation; the dispatcher applies the real one.
const INVOKE_CEILING: Duration = Duration::from_secs(60 * 60);

#[async_trait]
impl FixAgent for CommandFixAgent {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentOutput> {
        let streams = if request.interactive {
            StreamMode::Inherit
        } else {
            StreamMode::Capture
        };
        let output = run_with_timeout(
            &self.config.program,
            &self.config.args_for(request),
            &self.work_dir,
            INVOKE_CEILING,
            streams,
        )
        .await
        .map_err(|e| RemediationError::FixAgentUnavailable {
            command: self.config.program.clone(),
            hint: e.to_string(),
        })?;

        Ok(AgentOutput {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn probe(&self) -> Result<()> {
        let unavailable = |hint: String| RemediationError::FixAgentUnavailable {
            command: self.config.program.clone(),
            hint,
        };

        let output = run_with_timeout(
            &self.config.program,
            &["--version".to_string()],
            &self.work_dir,
            Duration::from_secs(30),
            StreamMode::Capture,
        )
        .await
        .map_err(|e| {
            unavailable(format!(
                "{e}; install it or point [agent].program in greenloop.toml at the agent binary"
            ))
        })?;

        if !output.success() {
            return Err(unavailable(format!(
                "`{} --version` exited with code {}",
                self.config.program, output.exit_code
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mode: FixMode, interactive: bool) -> AgentRequest {
        AgentRequest {
            prompt: "fix it".to_string(),
            mode,
            interactive,
        }
    }

    #[test]
    fn test_args_for_cheap_batch_request() {
        let config = AgentConfig::default();
        let args = config.args_for(&request(FixMode::Cheap, false));
        assert_eq!(
            args,
            vec!["--model", "sonnet", "--permission-mode", "acceptEdits", "-p", "fix it"]
        );
    }

    #[test]
    fn test_args_for_interactive_expensive_request() {
        let config = AgentConfig {
            extra_args: Vec::new(),
            ..Default::default()
        };
        let args = config.args_for(&request(FixMode::Expensive, true));
        assert_eq!(args, vec!["--model", "opus", "fix it"]);
    }

    #[tokio::test]
    async fn test_probe_reports_missing_binary() {
        let agent = CommandFixAgent::new(
            AgentConfig {
                program: "greenloop-no-such-agent".to_string(),
                ..Default::default()
            },
            ".",
        );
        let err = agent.probe().await.unwrap_err();
        assert!(matches!(err, RemediationError::FixAgentUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_invoke_runs_program_with_prompt_last() {
        let agent = CommandFixAgent::new(
            AgentConfig {
                program: "echo".to_string(),
                print_flag: String::new(),
                model_flag: String::new(),
                extra_args: Vec::new(),
                ..Default::default()
            },
            ".",
        );
        let out = agent.invoke(&request(FixMode::Cheap, false)).await.unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout.trim(), "fix it");
    }
}
