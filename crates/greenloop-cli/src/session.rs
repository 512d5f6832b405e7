//! Preflight checks and wiring of real collaborators into a session.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use greenloop_checks::{steps_for, ProcessStepExecutor};
use greenloop_core::process::{run_with_timeout, StreamMode};
use greenloop_core::vcs::is_git_repo;
use greenloop_core::{
    CiProvider, Collaborators, CommandFixAgent, FixAgent, GitCli, GitHubActions, Orchestrator,
    ParallelExecutor, RemediationConfig, RemediationError, RepoHealth, RepoSlug, Result,
    SessionReport, VcsClient,
};

const GITHUB_API_URL_ENV: &str = "GITHUB_API_URL";

/// `git` must be installed and `repo` must be inside a work tree.
pub async fn ensure_git(repo: &Path) -> Result<()> {
    let output = run_with_timeout(
        "git",
        &["--version".to_string()],
        repo,
        Duration::from_secs(15),
        StreamMode::Capture,
    )
    .await
    .map_err(|_| RemediationError::ToolMissing {
        tool: "git".to_string(),
        hint: "install git and make sure it is on PATH".to_string(),
    })?;
    debug!(version = %output.stdout.trim(), "git found");

    if !is_git_repo(repo).await {
        return Err(RemediationError::Config(format!(
            "{} is not inside a git work tree",
            repo.display()
        )));
    }
    Ok(())
}

/// GitHub Actions client for the repository behind `vcs`.
pub async fn github_provider(
    vcs: &dyn VcsClient,
    config: &RemediationConfig,
    token: &str,
) -> Result<GitHubActions> {
    let remote = vcs.remote_url().await?;
    let slug = RepoSlug::parse(&remote).ok_or_else(|| {
        RemediationError::Config(format!("cannot derive a GitHub repository from remote '{remote}'"))
    })?;

    let branch = match &config.ci.branch {
        Some(branch) => Some(branch.clone()),
        None => vcs.current_branch().await.ok(),
    };

    let mut provider = GitHubActions::new(slug, token)?.with_branch(branch);
    let api_base = config
        .ci
        .api_url
        .clone()
        .or_else(|| std::env::var(GITHUB_API_URL_ENV).ok().filter(|v| !v.trim().is_empty()));
    if let Some(api_base) = api_base {
        provider = provider.with_api_base(api_base);
    }
    Ok(provider)
}

/// Run every preflight check and build a session for `repo`.
pub async fn prepare(
    repo: &Path,
    config: &RemediationConfig,
    token: &str,
    shutdown: watch::Receiver<bool>,
) -> Result<Orchestrator> {
    ensure_git(repo).await?;

    let agent = CommandFixAgent::new(config.agent.clone(), repo);
    if !config.dry_run {
        agent.probe().await?;
    }

    let vcs = GitCli::new(repo);
    let provider = github_provider(&vcs, config, token).await?;
    info!(repo = %repo.display(), slug = %provider.slug(), "preflight passed");

    let steps = steps_for(config)?;
    let deps = Collaborators {
        executor: Arc::new(ProcessStepExecutor::new(repo)),
        agent: Arc::new(agent),
        vcs: Arc::new(vcs),
        ci: Arc::new(provider),
    };
    let state_root = repo.join(&config.state_dir);
    Ok(Orchestrator::new(config.clone(), steps, deps, &state_root, shutdown))
}

/// Probe the latest run of every configured repository.
pub async fn scan(config: &RemediationConfig, token: &str) -> Result<Vec<RepoHealth>> {
    let executor = ParallelExecutor::new(config.effective_workers());
    let probe_config = Arc::new(config.clone());
    let token = Arc::new(token.to_string());

    greenloop_core::parallel::scan_repos(&executor, config.cross_repo.repos.clone(), move |repo| {
        let config = Arc::clone(&probe_config);
        let token = Arc::clone(&token);
        async move {
            let vcs = GitCli::new(&repo);
            let provider = github_provider(&vcs, &config, &token).await?;
            Ok(provider.list_runs(1).await?.into_iter().next())
        }
    })
    .await
}

/// Run a watch-mode session for every failing repository, one at a time.
pub async fn remediate_failing(
    rows: &[RepoHealth],
    config: &RemediationConfig,
    token: &str,
    shutdown: &watch::Receiver<bool>,
) -> Vec<(String, std::result::Result<SessionReport, RemediationError>)> {
    let session_config = RemediationConfig {
        watch: true,
        ..config.clone()
    };

    let mut outcomes = Vec::new();
    for row in rows.iter().filter(|r| r.status.needs_remediation()) {
        if *shutdown.borrow() {
            warn!("cancelled, skipping remaining repositories");
            break;
        }
        let name = row.repo.display().to_string();
        info!(repo = %name, "starting remediation session");
        let outcome = match prepare(&row.repo, &session_config, token, shutdown.clone()).await {
            Ok(mut orchestrator) => Ok(orchestrator.run().await),
            Err(err) => Err(err),
        };
        outcomes.push((name, outcome));
    }
    outcomes
}
