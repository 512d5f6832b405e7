//! Bounded parallel execution and the cross-repository CI health scan.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{instrument, warn};

use crate::domain::{RunConclusion, RunStatus, WorkflowRun};
use crate::error::{RemediationError, Result};

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 3;

/// Runs independent async tasks with at most `workers` in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelExecutor {
    workers: usize,
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl ParallelExecutor {
    /// A worker count of zero is treated as one.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `task` to every item; results come back in input order.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, task: F) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let task = Arc::new(task);
        let sem = Arc::new(Semaphore::new(self.workers));
        let total = items.len();
        let mut join_set = JoinSet::new();

        for (idx, item) in items.into_iter().enumerate() {
            let task = Arc::clone(&task);
            let sem = Arc::clone(&sem);
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                (idx, task(item).await)
            });
        }

        let mut ordered: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
        while let Some(joined) = join_set.join_next().await {
            let (idx, result) =
                joined.map_err(|e| RemediationError::TaskFailed(format!("parallel task join error: {e}")))?;
            ordered[idx] = Some(result);
        }

        ordered
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.ok_or_else(|| RemediationError::TaskFailed(format!("missing result for task {idx}")))
            })
            .collect()
    }
}

/// Health of one repository's latest CI run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoHealthStatus {
    Healthy,
    Failing,
    Pending,
    NoRuns,
    Unreachable,
}

impl RepoHealthStatus {
    pub fn classify(run: Option<&WorkflowRun>) -> Self {
        match run {
            None => RepoHealthStatus::NoRuns,
            Some(r) if r.status != RunStatus::Completed => RepoHealthStatus::Pending,
            Some(r) if r.conclusion == Some(RunConclusion::Success) => RepoHealthStatus::Healthy,
            Some(_) => RepoHealthStatus::Failing,
        }
    }

    /// Whether a remediation session should be started for the repository.
    pub fn needs_remediation(&self) -> bool {
        matches!(self, RepoHealthStatus::Failing)
    }

    fn label(&self) -> &'static str {
        match self {
            RepoHealthStatus::Healthy => "healthy",
            RepoHealthStatus::Failing => "failing",
            RepoHealthStatus::Pending => "pending",
            RepoHealthStatus::NoRuns => "no runs",
            RepoHealthStatus::Unreachable => "unreachable",
        }
    }
}

/// One row of the cross-repository scan.
#[derive(Debug, Clone)]
pub struct RepoHealth {
    pub repo: PathBuf,
    pub status: RepoHealthStatus,
    pub latest_run: Option<WorkflowRun>,
    pub detail: Option<String>,
}

/// Fetch the latest run of every repository concurrently.
///
/// `latest_run` is the per-repository probe; its errors mark the repository
/// unreachable instead of failing the scan.
#[instrument(skip(executor, latest_run), fields(repos = repos.len(), workers = executor.workers()))]
pub async fn scan_repos<F, Fut>(
    executor: &ParallelExecutor,
    repos: Vec<PathBuf>,
    latest_run: F,
) -> Result<Vec<RepoHealth>>
where
    F: Fn(PathBuf) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<WorkflowRun>>> + Send + 'static,
{
    let latest_run = Arc::new(latest_run);
    executor
        .run(repos, move |repo| {
            let latest_run = Arc::clone(&latest_run);
            async move {
                match latest_run(repo.clone()).await {
                    Ok(run) => RepoHealth {
                        status: RepoHealthStatus::classify(run.as_ref()),
                        repo,
                        latest_run: run,
                        detail: None,
                    },
                    Err(err) => {
                        warn!(repo = %repo.display(), error = %err, "CI scan failed");
                        RepoHealth {
                            repo,
                            status: RepoHealthStatus::Unreachable,
                            latest_run: None,
                            detail: Some(err.to_string()),
                        }
                    }
                }
            }
        })
        .await
}

/// Plain-text summary table of a scan.
pub fn render_health_table(rows: &[RepoHealth]) -> String {
    let width = rows
        .iter()
        .map(|r| r.repo.display().to_string().len())
        .max()
        .unwrap_or(0)
        .max("REPOSITORY".len());

    let mut out = format!("{:<width$}  {:<11}  RUN\n", "REPOSITORY", "STATUS");
    for row in rows {
        let run = match (&row.latest_run, &row.detail) {
            (Some(run), _) => run.html_url.clone(),
            (None, Some(detail)) => detail.clone(),
            (None, None) => "-".to_string(),
        };
        out.push_str(&format!(
            "{:<width$}  {:<11}  {}\n",
            row.repo.display(),
            row.status.label(),
            run
        ));
    }
    out
}
