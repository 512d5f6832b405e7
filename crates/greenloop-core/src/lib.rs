//! greenloop core library
//!
//! Autonomous CI-failure remediation: run local checks, hand failures to a
//! fix agent, commit and push, then poll CI until it is green or a budget
//! runs out. The same failure is never dispatched twice.
//!
//! ## Key components
//!
//! - [`Orchestrator`]: the session state machine
//! - [`LocalCheckRunner`]: ordered, fail-fast verification steps
//! - [`EscalationStrategy`]: cheap/expensive fix-mode selection
//! - [`FixDispatcher`]: bounded fix-agent invocations
//! - [`ChangeCommitter`]: stage, commit and push
//! - [`CiMonitor`]: run matching against a [`CiProvider`]
//! - [`fingerprint()`]: failure deduplication

pub mod agent;
pub mod checks;
pub mod ci;
pub mod committer;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod escalation;
pub mod fakes;
pub mod fingerprint;
pub mod orchestrator;
pub mod parallel;
pub mod poll;
pub mod process;
pub mod prompts;
pub mod snapshot;
pub mod telemetry;
pub mod ticker;
pub mod vcs;

pub use agent::{AgentConfig, AgentOutput, AgentRequest, CommandFixAgent, FixAgent};
pub use checks::{LocalCheckRunner, LocalRunReport, StepExecutor};
pub use ci::{CiMonitor, CiProvider, GitHubActions, RepoSlug};
pub use committer::{ChangeCommitter, CommitOptions, CommitOutcome, MessageGenerator};
pub use config::RemediationConfig;
pub use dispatcher::{DispatchKind, DispatchOutcome, FixDispatcher};
pub use domain::{
    CheckResult, CheckStep, FixAttempt, FixMode, FixOutcome, JobRecord, RunConclusion, RunStatus,
    WorkflowRun,
};
pub use error::{RemediationError, Result};
pub use escalation::{EscalationPolicy, EscalationStrategy};
pub use fingerprint::{fingerprint, normalize};
pub use orchestrator::{
    Collaborators, FailureReport, Orchestrator, OrchestratorContext, SessionReport, SessionStatus,
};
pub use parallel::{ParallelExecutor, RepoHealth, RepoHealthStatus};
pub use poll::poll_delay;
pub use snapshot::{Snapshot, SnapshotManager};
pub use telemetry::init_tracing;
pub use ticker::Ticker;
pub use vcs::{GitCli, VcsClient};
