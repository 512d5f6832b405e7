//! greenloop checks
//!
//! Local verification for remediation sessions:
//! - Built-in Cargo presets (fmt, check, clippy, test)
//! - A subprocess [`StepExecutor`](greenloop_core::StepExecutor) with per-step timeouts

pub mod runner;
pub mod stage;

pub use runner::ProcessStepExecutor;
pub use stage::{resolve_presets, steps_for, BuiltinStage};
