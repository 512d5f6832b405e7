//! Adaptive CI polling delays.

use std::time::Duration;

use crate::domain::RunStatus;

/// Wait while no matching run exists yet. Does not consume the retry budget.
pub const RUN_NOT_FOUND_DELAY: Duration = Duration::from_secs(10);

/// Backoff after a failed CI fetch.
pub const FETCH_BACKOFF: Duration = Duration::from_secs(10);

/// Delay for queued or waiting runs.
const PENDING_DELAY_MS: u64 = 30_000;

/// In-progress runs with jobs still running: start, step and ceiling.
const ACTIVE_BASE_MS: u64 = 5_000;
const ACTIVE_CAP_MS: u64 = 15_000;

/// In-progress runs with no job currently running.
const IDLE_BASE_MS: u64 = 10_000;
const IDLE_CAP_MS: u64 = 20_000;

const STEP_MS: u64 = 2_000;

/// Delay before the next poll of a run in `status`.
///
/// `attempt` counts consecutive polls of the same run. Runs with active jobs
/// are polled faster so failing jobs can be fixed while others still run.
pub fn poll_delay(status: RunStatus, attempt: u32, has_active_jobs: bool) -> Duration {
    let ms = match status {
        RunStatus::Completed => 0,
        RunStatus::Queued | RunStatus::Waiting => PENDING_DELAY_MS,
        RunStatus::InProgress if has_active_jobs => {
            ramp(ACTIVE_BASE_MS, attempt).min(ACTIVE_CAP_MS)
        }
        RunStatus::InProgress => ramp(IDLE_BASE_MS, attempt).min(IDLE_CAP_MS),
    };
    Duration::from_millis(ms)
}

fn ramp(base: u64, attempt: u32) -> u64 {
    base.saturating_add(STEP_MS.saturating_mul(u64::from(attempt)))
}
