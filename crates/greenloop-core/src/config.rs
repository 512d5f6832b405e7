//! Session configuration.
//!
//! Layering, lowest to highest: built-in defaults, `greenloop.toml` in the
//! repository root, then environment variables and CLI flags (applied by the
//! binary on top of the loaded value).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::AgentConfig;
use crate::domain::{CheckStep, FixMode};
use crate::error::{RemediationError, Result};
use crate::parallel::DEFAULT_WORKERS;

/// Config file looked up in the repository root.
pub const CONFIG_FILE_NAME: &str = "greenloop.toml";

/// CI provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CiConfig {
    /// API root; `None` uses `GITHUB_API_URL` or the public API.
    pub api_url: Option<String>,
    /// Branch whose runs are listed; `None` uses the checked-out branch.
    pub branch: Option<String>,
    /// Runs fetched per poll.
    pub run_limit: u32,
    /// Give up when no run for the pushed commit appears within this window.
    pub run_discovery_timeout_secs: u64,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            branch: None,
            run_limit: crate::ci::monitor::DEFAULT_RUN_LIMIT,
            run_discovery_timeout_secs: 10 * 60,
        }
    }
}

/// `[cross_repo]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CrossRepoConfig {
    pub enabled: bool,
    /// Repositories scanned in cross-repo mode, relative to the config file.
    pub repos: Vec<PathBuf>,
}

/// Fix-agent timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub batch_secs: u64,
    pub interactive_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            batch_secs: crate::dispatcher::BATCH_TIMEOUT.as_secs(),
            interactive_secs: crate::dispatcher::INTERACTIVE_TIMEOUT.as_secs(),
        }
    }
}

/// Everything one remediation session needs to know.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemediationConfig {
    /// CI iterations allowed without a new commit.
    pub max_retries: u32,
    /// Automated local fix attempts per session.
    pub max_auto_fixes: u32,
    pub dry_run: bool,
    pub no_verify: bool,
    pub workers: usize,
    /// Force a single worker.
    pub seq: bool,
    pub force_mode: Option<FixMode>,
    /// Skip local checks and start by polling CI for HEAD.
    pub watch: bool,
    /// Ask the fix agent for commit messages instead of using the fallback.
    pub generate_commit_messages: bool,
    /// Session artifacts live under `<repo>/<state_dir>/sessions/`.
    pub state_dir: PathBuf,
    /// Built-in check presets, used when `steps` is empty.
    pub presets: Vec<String>,
    pub steps: Vec<CheckStep>,
    pub agent: AgentConfig,
    pub ci: CiConfig,
    pub cross_repo: CrossRepoConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_auto_fixes: 10,
            dry_run: false,
            no_verify: false,
            workers: DEFAULT_WORKERS,
            seq: false,
            force_mode: None,
            watch: false,
            generate_commit_messages: true,
            state_dir: PathBuf::from(".greenloop"),
            presets: ["fmt", "check", "clippy", "test"].map(String::from).to_vec(),
            steps: Vec::new(),
            agent: AgentConfig::default(),
            ci: CiConfig::default(),
            cross_repo: CrossRepoConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl RemediationConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load `greenloop.toml` from `repo_dir`, or defaults when it is absent.
    pub fn load(repo_dir: &Path) -> Result<Self> {
        Self::load_file(&repo_dir.join(CONFIG_FILE_NAME), false)
    }

    /// Load an explicit config file. Missing files are an error only when `required`.
    pub fn load_file(path: &Path, required: bool) -> Result<Self> {
        if !path.exists() {
            if required {
                return Err(RemediationError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)
            .map_err(|e| RemediationError::Config(format!("{}: {e}", path.display())))?;

        if let Some(base) = path.parent() {
            for repo in &mut config.cross_repo.repos {
                if repo.is_relative() {
                    *repo = base.join(&*repo);
                }
            }
        }
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RemediationError::Config("workers must be at least 1".to_string()));
        }
        if self.steps.is_empty() && self.presets.is_empty() && !self.watch {
            return Err(RemediationError::Config(
                "no checks configured; add [[steps]] or presets to greenloop.toml".to_string(),
            ));
        }
        if let Some(step) = self.steps.iter().find(|s| s.command.trim().is_empty()) {
            return Err(RemediationError::Config(format!("step '{}' has an empty command", step.name)));
        }
        if self.cross_repo.enabled && self.cross_repo.repos.is_empty() {
            return Err(RemediationError::Config(
                "--cross-repo needs [cross_repo].repos in greenloop.toml".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker count after applying `seq`.
    pub fn effective_workers(&self) -> usize {
        if self.seq {
            1
        } else {
            self.workers.max(1)
        }
    }

    pub fn run_discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.ci.run_discovery_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.batch_secs)
    }

    pub fn interactive_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.interactive_secs)
    }
}
