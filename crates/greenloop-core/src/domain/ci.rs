//! Remote CI workflow runs and jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a workflow run or job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Waiting,
    InProgress,
    Completed,
}

impl RunStatus {
    /// Map a provider status string. Unknown pre-start states count as queued.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "completed" => RunStatus::Completed,
            "in_progress" => RunStatus::InProgress,
            "waiting" => RunStatus::Waiting,
            _ => RunStatus::Queued,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::Waiting)
    }
}

/// Final conclusion of a completed run or job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
}

impl RunConclusion {
    /// Map a provider conclusion string; `None` while the run is unfinished.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw? {
            "success" | "neutral" | "skipped" => Some(RunConclusion::Success),
            "cancelled" => Some(RunConclusion::Cancelled),
            "" => None,
            _ => Some(RunConclusion::Failure),
        }
    }
}

/// One execution of the remote pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowRun {
    pub id: u64,
    pub name: String,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    pub head_sha: String,
    pub created_at: DateTime<Utc>,
    /// Link for manual inspection.
    pub html_url: String,
}

impl WorkflowRun {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed && self.conclusion == Some(RunConclusion::Success)
    }
}

/// One job inside a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRecord {
    pub id: u64,
    pub name: String,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    /// Blocking priority from the static name table; higher is fixed first.
    pub priority: u32,
    pub html_url: String,
}

impl JobRecord {
    pub fn new(
        id: u64,
        name: impl Into<String>,
        status: RunStatus,
        conclusion: Option<RunConclusion>,
    ) -> Self {
        let name = name.into();
        Self {
            id,
            priority: crate::ci::triage::priority_for(&name),
            name,
            status,
            conclusion,
            html_url: String::new(),
        }
    }

    pub fn failed(&self) -> bool {
        self.conclusion == Some(RunConclusion::Failure)
    }

    pub fn is_active(&self) -> bool {
        self.status != RunStatus::Completed
    }
}
