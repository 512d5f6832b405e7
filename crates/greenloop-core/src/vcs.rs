//! Version-control client.
//!
//! [`VcsClient`] is the narrow interface the orchestrator needs; [`GitCli`]
//! implements it by shelling out to `git` in the repository directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{RemediationError, Result};
use crate::process::{run_with_timeout, StreamMode};

/// Working-tree and remote operations used by a session.
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Porcelain status; empty when the tree is clean.
    async fn status(&self) -> Result<String>;

    /// Diff of the working tree (staged and unstaged) against HEAD.
    async fn diff(&self) -> Result<String>;

    async fn add(&self, paths: &[String]) -> Result<()>;

    async fn commit(&self, message: &str, no_verify: bool) -> Result<()>;

    async fn push(&self) -> Result<()>;

    async fn rev_parse(&self, reference: &str) -> Result<String>;

    async fn remote_url(&self) -> Result<String>;

    async fn current_branch(&self) -> Result<String>;

    /// Unstage everything, keeping working-tree contents.
    async fn reset_staged(&self) -> Result<()>;

    async fn is_dirty(&self) -> Result<bool> {
        Ok(!self.status().await?.trim().is_empty())
    }
}

/// `git` subprocess implementation of [`VcsClient`].
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_dir: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let owned: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        debug!(args = ?args, "git");
        let output = run_with_timeout("git", &owned, &self.repo_dir, self.timeout, StreamMode::Capture)
            .await
            .map_err(|e| RemediationError::Vcs(format!("failed to run git: {e}")))?;

        if !output.success() {
            return Err(RemediationError::Vcs(format!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl VcsClient for GitCli {
    async fn status(&self) -> Result<String> {
        self.git(&["status", "--porcelain"]).await
    }

    async fn diff(&self) -> Result<String> {
        self.git(&["diff", "HEAD"]).await
    }

    async fn add(&self, paths: &[String]) -> Result<()> {
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.git(&args).await.map(|_| ())
    }

    async fn commit(&self, message: &str, no_verify: bool) -> Result<()> {
        let mut args = vec!["commit", "-m", message];
        if no_verify {
            args.push("--no-verify");
        }
        self.git(&args).await.map(|_| ())
    }

    async fn push(&self) -> Result<()> {
        self.git(&["push"]).await.map(|_| ())
    }

    async fn rev_parse(&self, reference: &str) -> Result<String> {
        let sha = self.git(&["rev-parse", reference]).await?.trim().to_string();
        if sha.is_empty() {
            return Err(RemediationError::Vcs(format!(
                "git rev-parse {reference} returned empty output"
            )));
        }
        Ok(sha)
    }

    async fn remote_url(&self) -> Result<String> {
        Ok(self
            .git(&["remote", "get-url", "origin"])
            .await?
            .trim()
            .to_string())
    }

    async fn current_branch(&self) -> Result<String> {
        Ok(self
            .git(&["rev-parse", "--abbrev-ref", "HEAD"])
            .await?
            .trim()
            .to_string())
    }

    async fn reset_staged(&self) -> Result<()> {
        self.git(&["reset", "-q"]).await.map(|_| ())
    }
}

/// Check whether a directory is inside a git work tree.
pub async fn is_git_repo(dir: &Path) -> bool {
    GitCli::new(dir)
        .git(&["rev-parse", "--is-inside-work-tree"])
        .await
        .is_ok()
}
