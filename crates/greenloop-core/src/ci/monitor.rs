//! Locating the workflow run for a pushed commit.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, instrument};

use super::CiProvider;
use crate::domain::{JobRecord, WorkflowRun};
use crate::error::Result;

/// Runs created this many seconds before the push still count as matching.
const PUSH_SKEW_SECS: i64 = 2 * 60;

/// On the first poll, a run younger than this is accepted as a last resort.
const FIRST_POLL_WINDOW_SECS: i64 = 5 * 60;

/// Number of runs fetched per poll.
pub const DEFAULT_RUN_LIMIT: u32 = 20;

/// Pick the run belonging to `head_sha` from a newest-first run list.
///
/// Preference: a SHA prefix match, then the newest run created no earlier
/// than two minutes before the push, then (first poll only) the newest run
/// if it is under five minutes old.
pub fn match_run<'a>(
    runs: &'a [WorkflowRun],
    head_sha: &str,
    push_time: DateTime<Utc>,
    first_poll: bool,
    now: DateTime<Utc>,
) -> Option<&'a WorkflowRun> {
    if !head_sha.is_empty() {
        if let Some(run) = runs.iter().find(|r| r.head_sha.starts_with(head_sha)) {
            return Some(run);
        }
    }

    let earliest = push_time - ChronoDuration::seconds(PUSH_SKEW_SECS);
    if let Some(run) = runs.iter().find(|r| r.created_at >= earliest) {
        return Some(run);
    }

    if first_poll {
        let window = ChronoDuration::seconds(FIRST_POLL_WINDOW_SECS);
        return runs.first().filter(|r| now - r.created_at <= window);
    }
    None
}

/// Polls a [`CiProvider`] for the run of a pushed commit.
#[derive(Clone)]
pub struct CiMonitor {
    provider: Arc<dyn CiProvider>,
    run_limit: u32,
}

impl CiMonitor {
    pub fn new(provider: Arc<dyn CiProvider>) -> Self {
        Self {
            provider,
            run_limit: DEFAULT_RUN_LIMIT,
        }
    }

    pub fn with_run_limit(mut self, run_limit: u32) -> Self {
        self.run_limit = run_limit;
        self
    }

    #[instrument(skip(self), fields(head_sha = %head_sha))]
    pub async fn find_matching_run(
        &self,
        head_sha: &str,
        push_time: DateTime<Utc>,
        first_poll: bool,
    ) -> Result<Option<WorkflowRun>> {
        let runs = self.provider.list_runs(self.run_limit).await?;
        let found = match_run(&runs, head_sha, push_time, first_poll, Utc::now()).cloned();
        debug!(
            candidates = runs.len(),
            run_id = found.as_ref().map(|r| r.id),
            "matched workflow run"
        );
        Ok(found)
    }

    pub async fn get_jobs(&self, run_id: u64) -> Result<Vec<JobRecord>> {
        self.provider.get_run_jobs(run_id).await
    }

    pub async fn get_job_logs(&self, job_id: u64) -> Result<String> {
        self.provider.get_job_log(job_id).await
    }
}
