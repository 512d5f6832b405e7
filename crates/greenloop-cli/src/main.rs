//! greenloop - autonomous CI failure remediation
//!
//! Runs the repository's local checks, hands failures to a fix agent,
//! commits and pushes, then polls GitHub Actions until the run is green or
//! a budget runs out.
//!
//! Exit code 0 means every session ended green; anything else is 1.

mod session;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn, Level};

use greenloop_core::ci::resolve_token;
use greenloop_core::parallel::render_health_table;
use greenloop_core::{FixMode, RemediationConfig, SessionReport};

#[derive(Parser, Debug)]
#[command(name = "greenloop")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Autonomous CI failure remediation", long_about = None)]
struct Cli {
    /// CI iterations allowed without a new commit
    #[arg(long, env = "GREENLOOP_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Automated local fix attempts before manual escalation
    #[arg(long, env = "GREENLOOP_MAX_AUTO_FIXES")]
    max_auto_fixes: Option<u32>,

    /// Run checks and read CI status, but never dispatch, commit or push
    #[arg(long, env = "GREENLOOP_DRY_RUN")]
    dry_run: bool,

    /// Pass --no-verify to git commit
    #[arg(long, env = "GREENLOOP_NO_VERIFY")]
    no_verify: bool,

    /// Concurrent workers for the cross-repository scan
    #[arg(long, env = "GREENLOOP_WORKERS")]
    workers: Option<usize>,

    /// Scan the repositories listed in [cross_repo] and remediate failing ones
    #[arg(long)]
    cross_repo: bool,

    /// Use a single worker
    #[arg(long)]
    seq: bool,

    /// Always use this fix mode (cheap or expensive)
    #[arg(long, env = "GREENLOOP_FORCE_MODE")]
    force_mode: Option<FixMode>,

    /// Skip local checks and start by polling CI for HEAD
    #[arg(long)]
    watch: bool,

    /// Repository to remediate
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Config file (default: <repo>/greenloop.toml)
    #[arg(long, env = "GREENLOOP_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines and a JSON session report
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// Flags and environment variables win over the config file.
    fn apply(&self, config: &mut RemediationConfig) {
        if let Some(n) = self.max_retries {
            config.max_retries = n;
        }
        if let Some(n) = self.max_auto_fixes {
            config.max_auto_fixes = n;
        }
        if let Some(n) = self.workers {
            config.workers = n;
        }
        if let Some(mode) = self.force_mode {
            config.force_mode = Some(mode);
        }
        config.dry_run |= self.dry_run;
        config.no_verify |= self.no_verify;
        config.seq |= self.seq;
        config.watch |= self.watch;
        config.cross_repo.enabled |= self.cross_repo;
    }
}

fn load_config(cli: &Cli, repo: &Path) -> Result<RemediationConfig> {
    let mut config = match &cli.config {
        Some(path) => RemediationConfig::load_file(path, true)?,
        None => RemediationConfig::load(repo)?,
    };
    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    greenloop_core::init_tracing(cli.json, level);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("greenloop: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let repo = cli
        .repo
        .canonicalize()
        .with_context(|| format!("repository path {} does not exist", cli.repo.display()))?;
    let config = load_config(&cli, &repo)?;

    let (shutdown_tx, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            let _ = shutdown_tx.send(true);
        }
    });

    let token = resolve_token(&repo).await.context("GitHub token")?;

    if config.cross_repo.enabled {
        return run_cross_repo(&config, &token, &shutdown, cli.json).await;
    }

    let mut orchestrator = session::prepare(&repo, &config, &token, shutdown)
        .await
        .context("preflight failed")?;
    info!(session_id = orchestrator.session_id(), repo = %repo.display(), "starting session");
    let report = orchestrator.run().await;
    print_report(&report, orchestrator.session_dir(), cli.json)?;
    Ok(report.succeeded())
}

async fn run_cross_repo(
    config: &RemediationConfig,
    token: &str,
    shutdown: &watch::Receiver<bool>,
    json: bool,
) -> Result<bool> {
    let rows = session::scan(config, token).await.context("cross-repo scan failed")?;
    println!("{}", render_health_table(&rows));

    let failing = rows.iter().filter(|r| r.status.needs_remediation()).count();
    if failing == 0 {
        println!("No failing repositories.");
        return Ok(rows.iter().all(|r| r.detail.is_none()));
    }

    let mut all_green = true;
    for (repo, outcome) in session::remediate_failing(&rows, config, token, shutdown).await {
        println!("== {repo}");
        match outcome {
            Ok(report) => {
                all_green &= report.succeeded();
                let session_dir = Path::new(&repo)
                    .join(&config.state_dir)
                    .join("sessions")
                    .join(&report.session_id);
                print_report(&report, &session_dir, json)?;
            }
            Err(err) => {
                all_green = false;
                println!("Preflight failed: {err}");
            }
        }
    }
    Ok(all_green)
}

fn print_report(report: &SessionReport, session_dir: &Path, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!();
    println!("Session: {}", report.session_id);
    println!("Status: {}", if report.succeeded() { "✓ GREEN" } else { "✗ FAILED" });
    println!(
        "Fix attempts: {} (local: {}, CI retries: {})",
        report.attempts.len(),
        report.local_fix_attempts,
        report.ci_retries
    );
    if !report.head_sha.is_empty() {
        println!("HEAD: {}", report.head_sha);
    }

    if let Some(failure) = &report.failure {
        println!("Reason: {}", failure.message);
        if let Some(url) = &failure.run_url {
            println!("Run: {url}");
        }
        if !failure.excerpt.trim().is_empty() {
            println!();
            for line in failure.excerpt.lines() {
                println!("    {line}");
            }
            println!();
        }
        if let Some(guidance) = &failure.guidance {
            println!("Next step: {guidance}");
        }
    }

    if !report.snapshots.is_empty() {
        println!("Snapshots: {} in {}", report.snapshots.len(), session_dir.display());
    }
    Ok(())
}
