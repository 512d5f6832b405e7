//! GitHub Actions REST client.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::CiProvider;
use crate::domain::{JobRecord, RunConclusion, RunStatus, WorkflowRun};
use crate::error::{RemediationError, Result};
use crate::process::{run_with_timeout, StreamMode};

/// Base URL for the public GitHub REST API.
pub const GITHUB_API_BASE: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("greenloop/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `owner/repo` pair identifying a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    /// Parse an `origin` URL in SSH (`git@github.com:o/r.git`) or HTTPS form.
    pub fn parse(remote_url: &str) -> Option<Self> {
        let url = remote_url.trim();
        let path = if let Some(rest) = url.strip_prefix("git@") {
            rest.split_once(':')?.1
        } else if let Some(rest) = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .or_else(|| url.strip_prefix("ssh://git@"))
        {
            rest.split_once('/')?.1
        } else {
            return None;
        };

        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let mut parts = path.splitn(2, '/');
        let owner = parts.next().filter(|s| !s.is_empty())?;
        let repo = parts.next().filter(|s| !s.is_empty() && !s.contains('/'))?;
        Some(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

impl std::fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Find an API token: `GITHUB_TOKEN`, then `GH_TOKEN`, then `gh auth token`.
pub async fn resolve_token(cwd: &Path) -> Result<String> {
    for var in ["GITHUB_TOKEN", "GH_TOKEN"] {
        if let Ok(token) = std::env::var(var) {
            if !token.trim().is_empty() {
                debug!(source = var, "using GitHub token from environment");
                return Ok(token.trim().to_string());
            }
        }
    }

    let missing = |hint: &str| RemediationError::ToolMissing {
        tool: "GitHub token".to_string(),
        hint: hint.to_string(),
    };

    let output = run_with_timeout(
        "gh",
        &["auth".to_string(), "token".to_string()],
        cwd,
        Duration::from_secs(15),
        StreamMode::Capture,
    )
    .await
    .map_err(|_| missing("set GITHUB_TOKEN or install the GitHub CLI and run `gh auth login`"))?;

    let token = output.stdout.trim();
    if !output.success() || token.is_empty() {
        return Err(missing("`gh auth token` returned nothing; run `gh auth login` or set GITHUB_TOKEN"));
    }
    Ok(token.to_string())
}

#[derive(Debug, Deserialize)]
struct RunsPage {
    workflow_runs: Vec<RunPayload>,
}

#[derive(Debug, Deserialize)]
struct RunPayload {
    id: u64,
    name: Option<String>,
    status: Option<String>,
    conclusion: Option<String>,
    head_sha: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    html_url: String,
}

impl From<RunPayload> for WorkflowRun {
    fn from(p: RunPayload) -> Self {
        WorkflowRun {
            id: p.id,
            name: p.name.unwrap_or_else(|| format!("run {}", p.id)),
            status: RunStatus::parse(p.status.as_deref().unwrap_or("queued")),
            conclusion: RunConclusion::parse(p.conclusion.as_deref()),
            head_sha: p.head_sha,
            created_at: p.created_at,
            html_url: p.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobsPage {
    jobs: Vec<JobPayload>,
}

#[derive(Debug, Deserialize)]
struct JobPayload {
    id: u64,
    name: String,
    status: Option<String>,
    conclusion: Option<String>,
    html_url: Option<String>,
}

impl From<JobPayload> for JobRecord {
    fn from(p: JobPayload) -> Self {
        let mut job = JobRecord::new(
            p.id,
            p.name,
            RunStatus::parse(p.status.as_deref().unwrap_or("queued")),
            RunConclusion::parse(p.conclusion.as_deref()),
        );
        job.html_url = p.html_url.unwrap_or_default();
        job
    }
}

/// [`CiProvider`] backed by the GitHub Actions REST API.
#[derive(Debug, Clone)]
pub struct GitHubActions {
    http: Client,
    api_base: String,
    slug: RepoSlug,
    token: String,
    branch: Option<String>,
}

impl GitHubActions {
    pub fn new(slug: RepoSlug, token: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_base: GITHUB_API_BASE.to_string(),
            slug,
            token: token.into(),
            branch: None,
        })
    }

    /// Point at a GitHub Enterprise API root.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Only list runs triggered on `branch`.
    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch.filter(|b| !b.is_empty() && b != "HEAD");
        self
    }

    pub fn slug(&self) -> &RepoSlug {
        &self.slug
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.slug.owner, self.slug.repo, path
        )
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let resp = request
            .send()
            .await
            .map_err(|e| RemediationError::CiFetchFailure(format!("{what} request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RemediationError::CiFetchFailure(format!(
                "{what} returned {status}: {}",
                body.chars().take(300).collect::<String>()
            )));
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, what: &str) -> Result<T> {
        self.send(request, what)
            .await?
            .json::<T>()
            .await
            .map_err(|e| RemediationError::CiFetchFailure(format!("{what} parse failed: {e}")))
    }
}

#[async_trait]
impl CiProvider for GitHubActions {
    async fn list_runs(&self, limit: u32) -> Result<Vec<WorkflowRun>> {
        let mut query = vec![("per_page", limit.clamp(1, 100).to_string())];
        if let Some(branch) = &self.branch {
            query.push(("branch", branch.clone()));
        }
        let request = self.request(&self.repo_url("actions/runs")).query(&query);
        let page: RunsPage = self.get_json(request, "list runs").await?;
        debug!(repo = %self.slug, count = page.workflow_runs.len(), "listed workflow runs");
        Ok(page.workflow_runs.into_iter().map(WorkflowRun::from).collect())
    }

    async fn get_run_jobs(&self, run_id: u64) -> Result<Vec<JobRecord>> {
        let request = self
            .request(&self.repo_url(&format!("actions/runs/{run_id}/jobs")))
            .query(&[("per_page", "100")]);
        let page: JobsPage = self.get_json(request, "list jobs").await?;
        Ok(page.jobs.into_iter().map(JobRecord::from).collect())
    }

    async fn get_job_log(&self, job_id: u64) -> Result<String> {
        let request = self.request(&self.repo_url(&format!("actions/jobs/{job_id}/logs")));
        self.send(request, "job log")
            .await?
            .text()
            .await
            .map_err(|e| RemediationError::CiFetchFailure(format!("job log read failed: {e}")))
    }
}
