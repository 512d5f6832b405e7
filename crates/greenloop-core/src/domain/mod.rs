//! Domain models for greenloop.
//!
//! Canonical definitions for the entities owned by one remediation session:
//! - `CheckStep` / `CheckResult`: local verification steps and their outcomes
//! - `FixMode` / `FixAttempt`: fix-agent invocations and their classification
//! - `WorkflowRun` / `JobRecord`: remote CI state, re-fetched on every poll

pub mod check;
pub mod ci;
pub mod fix;

pub use check::{CheckResult, CheckStep};
pub use ci::{JobRecord, RunConclusion, RunStatus, WorkflowRun};
pub use fix::{FixAttempt, FixMode, FixOutcome};
