//! Fix dispatch with bounded timeouts and outcome classification.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::agent::{AgentRequest, FixAgent};
use crate::domain::{FixMode, FixOutcome};

/// Default timeout for batch (non-interactive) fixes.
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(150);

/// Default timeout for the interactive manual escalation.
pub const INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Which timeout class an invocation falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    /// Captured output, short timeout.
    Batch,
    /// Inherited terminal, long timeout.
    Interactive,
}

/// What happened when the agent was dispatched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl DispatchOutcome {
    /// Classify the dispatch. `Success` only means the agent *claims* it is
    /// done; the caller re-runs checks before trusting it.
    pub fn outcome(&self) -> FixOutcome {
        if self.timed_out {
            FixOutcome::Timeout
        } else if self.exit_code == 0 {
            FixOutcome::Success
        } else {
            FixOutcome::Failure
        }
    }
}

/// Invokes the fix agent with the session's timeouts.
#[derive(Clone)]
pub struct FixDispatcher {
    agent: Arc<dyn FixAgent>,
    batch_timeout: Duration,
    interactive_timeout: Duration,
}

impl FixDispatcher {
    pub fn new(agent: Arc<dyn FixAgent>) -> Self {
        Self {
            agent,
            batch_timeout: BATCH_TIMEOUT,
            interactive_timeout: INTERACTIVE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, batch: Duration, interactive: Duration) -> Self {
        self.batch_timeout = batch;
        self.interactive_timeout = interactive;
        self
    }

    pub fn timeout_for(&self, kind: DispatchKind) -> Duration {
        match kind {
            DispatchKind::Batch => self.batch_timeout,
            DispatchKind::Interactive => self.interactive_timeout,
        }
    }

    /// Run the agent against `prompt`, killing it when the timeout elapses.
    #[instrument(skip(self, prompt), fields(prompt_len = prompt.len()))]
    pub async fn dispatch(&self, prompt: &str, mode: FixMode, kind: DispatchKind) -> DispatchOutcome {
        let timeout = self.timeout_for(kind);
        let request = AgentRequest {
            prompt: prompt.to_string(),
            mode,
            interactive: kind == DispatchKind::Interactive,
        };

        info!(%mode, ?kind, timeout_secs = timeout.as_secs(), "dispatching fix agent");

        match tokio::time::timeout(timeout, self.agent.invoke(&request)).await {
            Ok(Ok(output)) => DispatchOutcome {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
                timed_out: false,
            },
            Ok(Err(err)) => {
                warn!(error = %err, "fix agent invocation failed");
                DispatchOutcome {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: err.to_string(),
                    timed_out: false,
                }
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "fix agent timed out");
                DispatchOutcome {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: crate::error::RemediationError::FixAgentTimeout(timeout).to_string(),
                    timed_out: true,
                }
            }
        }
    }
}
