//! Remote CI provider access.
//!
//! - [`CiProvider`]: the three reads a session needs from the CI system
//! - [`github`]: GitHub Actions REST implementation
//! - [`monitor`]: run matching for a pushed commit
//! - [`triage`]: job prioritisation and log excerpting

pub mod github;
pub mod monitor;
pub mod triage;

use async_trait::async_trait;

use crate::domain::{JobRecord, WorkflowRun};
use crate::error::Result;

pub use github::{resolve_token, GitHubActions, RepoSlug};
pub use monitor::{match_run, CiMonitor};
pub use triage::{extract_relevant_log, prioritize, priority_for};

/// Read-only view of a remote CI system.
#[async_trait]
pub trait CiProvider: Send + Sync {
    /// Most recent workflow runs, newest first.
    async fn list_runs(&self, limit: u32) -> Result<Vec<WorkflowRun>>;

    /// Jobs of one run.
    async fn get_run_jobs(&self, run_id: u64) -> Result<Vec<JobRecord>>;

    /// Raw log text of one job.
    async fn get_job_log(&self, job_id: u64) -> Result<String>;
}
