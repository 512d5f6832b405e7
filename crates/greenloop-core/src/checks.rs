//! Local check runner: ordered, fail-fast execution of verification steps.
//!
//! Step execution itself is behind the [`StepExecutor`] trait so the
//! orchestrator can be driven by a subprocess backend in production and a
//! scripted one in tests.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::{CheckResult, CheckStep};

/// Backend that executes a single verification step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute one step. Non-zero exit codes are results, not errors.
    async fn execute(&self, step: &CheckStep) -> CheckResult;
}

/// Outcome of running a list of steps.
#[derive(Debug, Clone, Default)]
pub struct LocalRunReport {
    /// Results in execution order, including the failing one.
    pub results: Vec<CheckResult>,

    /// Index (into the full step list) and result of the first failure.
    pub failed: Option<(usize, CheckResult)>,
}

impl LocalRunReport {
    pub fn passed(&self) -> bool {
        self.failed.is_none()
    }
}

/// Runs steps strictly in order and stops at the first failure.
#[derive(Clone)]
pub struct LocalCheckRunner {
    executor: Arc<dyn StepExecutor>,
}

impl LocalCheckRunner {
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self { executor }
    }

    /// Run every step from the first one.
    pub async fn run(&self, steps: &[CheckStep]) -> LocalRunReport {
        self.run_from(steps, 0).await
    }

    /// Run steps starting at `start`, fail-fast.
    pub async fn run_from(&self, steps: &[CheckStep], start: usize) -> LocalRunReport {
        let mut report = LocalRunReport::default();

        for (index, step) in steps.iter().enumerate().skip(start) {
            info!(step = %step.name, command = %step.command_line(), "running check");
            let result = self.executor.execute(step).await;

            if result.passed() {
                debug!(step = %step.name, duration_ms = result.duration_ms, "check passed");
                report.results.push(result);
                continue;
            }

            warn!(
                step = %step.name,
                exit_code = result.exit_code,
                timed_out = result.timed_out,
                "check failed"
            );
            report.results.push(result.clone());
            report.failed = Some((index, result));
            break;
        }

        report
    }

    /// Re-run a single step, typically to verify a fix.
    pub async fn run_step(&self, step: &CheckStep) -> CheckResult {
        self.executor.execute(step).await
    }
}
