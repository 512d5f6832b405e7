//! Remediation session state machine.
//!
//! ```text
//! LocalChecks -> AutoFixLocal -> CommitPush -> CiPoll -> JobFix -> Done | Failed
//! ```
//!
//! One [`Orchestrator`] owns one session. All mutable session state lives in
//! [`OrchestratorContext`]; collaborators are injected as trait objects so the
//! whole loop runs against fakes in tests.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::agent::FixAgent;
use crate::checks::{LocalCheckRunner, StepExecutor};
use crate::ci::triage::{extract_relevant_log, prioritize};
use crate::ci::{CiMonitor, CiProvider};
use crate::committer::{AgentMessageGenerator, ChangeCommitter, CommitOptions};
use crate::config::RemediationConfig;
use crate::dispatcher::{DispatchKind, DispatchOutcome, FixDispatcher};
use crate::domain::{CheckResult, CheckStep, FixAttempt, FixMode, FixOutcome, JobRecord, RunStatus, WorkflowRun};
use crate::error::{RemediationError, Result};
use crate::escalation::EscalationStrategy;
use crate::fingerprint::fingerprint;
use crate::poll::{poll_delay, FETCH_BACKOFF, RUN_NOT_FOUND_DELAY};
use crate::prompts;
use crate::snapshot::{write_with_digest, SnapshotManager};
use crate::ticker::Ticker;
use crate::vcs::VcsClient;

/// Heartbeat period for long-running agent and check invocations.
const TICK_PERIOD: Duration = Duration::from_secs(30);

/// Lines of failure output kept in the session report.
const REPORT_EXCERPT_LINES: usize = 40;

/// Task key for repository-wide CI fixes.
const CI_REPO_TASK: &str = "ci:repo";

/// External systems a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn StepExecutor>,
    pub agent: Arc<dyn FixAgent>,
    pub vcs: Arc<dyn VcsClient>,
    pub ci: Arc<dyn CiProvider>,
}

#[derive(Debug)]
enum State {
    LocalChecks { from: usize },
    AutoFixLocal { index: usize, result: CheckResult },
    CommitPush,
    CiPoll,
    JobFix { run: WorkflowRun, jobs: Vec<JobRecord> },
    Done,
    Failed(RemediationError),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::LocalChecks { .. } => "local_checks",
            State::AutoFixLocal { .. } => "auto_fix_local",
            State::CommitPush => "commit_push",
            State::CiPoll => "ci_poll",
            State::JobFix { .. } => "job_fix",
            State::Done => "done",
            State::Failed(_) => "failed",
        }
    }
}

/// Mutable state of one session.
#[derive(Debug)]
pub struct OrchestratorContext {
    pub session_id: String,
    /// Fingerprints of every failure seen this session.
    pub seen_errors: HashSet<String>,
    pub escalation: EscalationStrategy,
    /// Automated local fix attempts, session-wide.
    pub local_fix_attempts: u32,
    /// CI iterations that produced no new commit.
    pub ci_retries: u32,
    /// Consecutive failed CI reads.
    pub fetch_failures: u32,
    /// Commits created by job fixes that are not pushed yet.
    pub pending_commits: u32,
    /// A repository-wide CI fix is waiting to be committed.
    pub pending_ci_fix: bool,
    pub head_sha: String,
    pub push_time: DateTime<Utc>,
    pub first_poll: bool,
    /// Consecutive polls of the current run.
    pub poll_attempt: u32,
    pub current_run_id: Option<u64>,
    /// Jobs already handed to the fix agent for the current run.
    pub handled_jobs: HashSet<u64>,
    /// Completed runs a repository-wide fix was dispatched for.
    pub remediated_runs: HashSet<u64>,
    pub not_found_since: Option<Instant>,
    pub last_excerpt: String,
    pub last_run_url: Option<String>,
    pub snapshots: Vec<PathBuf>,
}

impl OrchestratorContext {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            seen_errors: HashSet::new(),
            escalation: EscalationStrategy::default(),
            local_fix_attempts: 0,
            ci_retries: 0,
            fetch_failures: 0,
            pending_commits: 0,
            pending_ci_fix: false,
            head_sha: String::new(),
            push_time: Utc::now(),
            first_poll: true,
            poll_attempt: 0,
            current_run_id: None,
            handled_jobs: HashSet::new(),
            remediated_runs: HashSet::new(),
            not_found_since: None,
            last_excerpt: String::new(),
            last_run_url: None,
            snapshots: Vec::new(),
        }
    }

    /// Start tracking a freshly pushed `sha`: CI retries, polling and job
    /// bookkeeping all restart from zero.
    pub fn record_push(&mut self, sha: String, at: DateTime<Utc>) {
        self.head_sha = sha;
        self.push_time = at;
        self.first_poll = true;
        self.ci_retries = 0;
        self.poll_attempt = 0;
        self.current_run_id = None;
        self.handled_jobs.clear();
        self.not_found_since = None;
    }

    /// Record a failure fingerprint. Returns `false` if it was already seen.
    pub fn remember_failure(&mut self, fingerprint: String) -> bool {
        self.seen_errors.insert(fingerprint)
    }

    fn set_excerpt(&mut self, text: &str) {
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(REPORT_EXCERPT_LINES);
        self.last_excerpt = lines[start..].join("\n");
    }
}

impl Default for OrchestratorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal status of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Done,
    Failed,
}

/// Why a session failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureReport {
    /// Error variant, e.g. `duplicate_error_detected`.
    pub kind: String,
    pub message: String,
    pub guidance: Option<String>,
    /// Tail of the last failure output.
    pub excerpt: String,
    pub run_url: Option<String>,
}

/// Persisted summary of one session (`session.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub failure: Option<FailureReport>,
    pub attempts: Vec<FixAttempt>,
    pub local_fix_attempts: u32,
    pub ci_retries: u32,
    pub head_sha: String,
    pub snapshots: Vec<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionReport {
    pub fn succeeded(&self) -> bool {
        self.status == SessionStatus::Done
    }
}

/// Resolves once `shutdown` reads true. Never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Race `fut` against cancellation. The losing future is dropped, which
/// kills any child process it owns.
async fn cancellable<F: Future>(mut shutdown: watch::Receiver<bool>, fut: F) -> Result<F::Output> {
    if *shutdown.borrow() {
        return Err(RemediationError::Cancelled);
    }
    tokio::select! {
        out = fut => Ok(out),
        _ = shutdown_requested(&mut shutdown) => Err(RemediationError::Cancelled),
    }
}

/// Drives one remediation session to `Done` or `Failed`.
pub struct Orchestrator {
    config: RemediationConfig,
    steps: Vec<CheckStep>,
    runner: LocalCheckRunner,
    dispatcher: FixDispatcher,
    committer: ChangeCommitter,
    monitor: CiMonitor,
    vcs: Arc<dyn VcsClient>,
    snapshots: SnapshotManager,
    session_dir: PathBuf,
    shutdown: watch::Receiver<bool>,
    ctx: OrchestratorContext,
}

impl Orchestrator {
    /// Build a session. Artifacts go to `<state_root>/sessions/<session-id>/`.
    pub fn new(
        config: RemediationConfig,
        steps: Vec<CheckStep>,
        deps: Collaborators,
        state_root: &Path,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let ctx = OrchestratorContext::new();
        let session_dir = state_root.join("sessions").join(&ctx.session_id);

        let dispatcher = FixDispatcher::new(deps.agent)
            .with_timeouts(config.batch_timeout(), config.interactive_timeout());
        let mut committer = ChangeCommitter::new(Arc::clone(&deps.vcs));
        if config.generate_commit_messages {
            committer = committer.with_generator(Arc::new(AgentMessageGenerator::new(dispatcher.clone())));
        }

        Self {
            runner: LocalCheckRunner::new(deps.executor),
            monitor: CiMonitor::new(deps.ci).with_run_limit(config.ci.run_limit),
            snapshots: SnapshotManager::new(Arc::clone(&deps.vcs), session_dir.join("snapshots")),
            vcs: deps.vcs,
            dispatcher,
            committer,
            steps,
            session_dir,
            shutdown,
            ctx,
            config,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.ctx.session_id
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn context(&self) -> &OrchestratorContext {
        &self.ctx
    }

    /// Run the session to completion and write `session.json`.
    #[instrument(skip(self), fields(session_id = %self.ctx.session_id))]
    pub async fn run(&mut self) -> SessionReport {
        let started_at = Utc::now();
        info!(
            steps = self.steps.len(),
            dry_run = self.config.dry_run,
            watch = self.config.watch,
            "remediation session started"
        );

        let mut state = match self.initial_state().await {
            Ok(state) => state,
            Err(err) => State::Failed(err),
        };

        loop {
            if matches!(state, State::Done | State::Failed(_)) {
                break;
            }
            if *self.shutdown.borrow() {
                state = State::Failed(RemediationError::Cancelled);
                break;
            }
            debug!(state = state.name(), "entering state");
            state = match self.step(state).await {
                Ok(next) => next,
                Err(err) => State::Failed(err),
            };
        }

        let report = self.finish(state, started_at);
        let path = self.session_dir.join("session.json");
        if let Err(err) = write_with_digest(&report, &path) {
            warn!(error = %err, path = %path.display(), "failed to write session report");
        }
        report
    }

    async fn initial_state(&mut self) -> Result<State> {
        if self.config.watch {
            let head = self.vcs.rev_parse("HEAD").await?;
            info!(head_sha = %head, "watch mode: polling CI for HEAD");
            self.ctx.record_push(head, Utc::now());
            return Ok(State::CiPoll);
        }
        Ok(State::LocalChecks { from: 0 })
    }

    async fn step(&mut self, state: State) -> Result<State> {
        match state {
            State::LocalChecks { from } => self.local_checks(from).await,
            State::AutoFixLocal { index, result } => self.auto_fix_local(index, result).await,
            State::CommitPush => self.commit_push().await,
            State::CiPoll => self.ci_poll().await,
            State::JobFix { run, jobs } => self.job_fix(run, jobs).await,
            terminal @ (State::Done | State::Failed(_)) => Ok(terminal),
        }
    }

    async fn local_checks(&mut self, from: usize) -> Result<State> {
        let _ticker = Ticker::start("local checks", TICK_PERIOD, self.shutdown.clone());
        let report = cancellable(self.shutdown.clone(), self.runner.run_from(&self.steps, from)).await?;

        let Some((index, result)) = report.failed else {
            info!(from, "local checks passed");
            return Ok(State::CommitPush);
        };

        let text = result.failure_text();
        self.ctx.set_excerpt(&text);

        if self.config.dry_run {
            return Ok(State::Failed(RemediationError::LocalCheckFailure {
                step: result.step_name,
                exit_code: result.exit_code,
            }));
        }

        let fp = fingerprint(&text);
        if !self.ctx.remember_failure(fp.clone()) {
            warn!(step = %result.step_name, fingerprint = %fp, "failure already seen");
            return Ok(State::Failed(RemediationError::DuplicateErrorDetected { fingerprint: fp }));
        }

        self.snapshot(&format!("local-{}", result.step_name)).await;
        Ok(State::AutoFixLocal { index, result })
    }

    async fn auto_fix_local(&mut self, index: usize, mut current: CheckResult) -> Result<State> {
        let step = self.steps[index].clone();
        let task = format!("local:{}", step.name);

        loop {
            if self.ctx.local_fix_attempts >= self.config.max_auto_fixes {
                return self.manual_escalation(index, &step, &task, &current).await;
            }

            let text = current.failure_text();
            let mode = self.ctx.escalation.select_mode(&task, &text, self.config.force_mode);
            let outcome = self
                .dispatch(&prompts::local_failure(&step, &text), mode, DispatchKind::Batch, &task)
                .await?;
            self.ctx.local_fix_attempts += 1;

            let rerun = self.rerun(&step).await?;
            if rerun.passed() {
                self.ctx.escalation.record_attempt(&task, mode, FixOutcome::Success, false);
                info!(step = %step.name, attempts = self.ctx.local_fix_attempts, "local fix verified");
                return Ok(State::LocalChecks { from: index + 1 });
            }

            let failed_as = failure_outcome(&outcome);
            self.ctx.escalation.record_attempt(&task, mode, failed_as, false);

            let rerun_text = rerun.failure_text();
            self.ctx.set_excerpt(&rerun_text);
            let fp = fingerprint(&rerun_text);
            if !self.ctx.remember_failure(fp.clone()) {
                warn!(step = %step.name, fingerprint = %fp, "fix left the failure unchanged");
                return Ok(State::Failed(RemediationError::DuplicateErrorDetected { fingerprint: fp }));
            }

            if self.ctx.local_fix_attempts < self.config.max_auto_fixes {
                self.snapshot(&format!("local-{}", step.name)).await;
            }
            current = rerun;
        }
    }

    async fn manual_escalation(
        &mut self,
        index: usize,
        step: &CheckStep,
        task: &str,
        current: &CheckResult,
    ) -> Result<State> {
        warn!(
            step = %step.name,
            attempts = self.ctx.local_fix_attempts,
            "auto-fix budget exhausted, starting manual escalation"
        );
        let prompt = prompts::manual_escalation(step, &current.failure_text(), self.ctx.local_fix_attempts);
        let outcome = self
            .dispatch(&prompt, FixMode::Expensive, DispatchKind::Interactive, task)
            .await?;

        let rerun = self.rerun(step).await?;
        if rerun.passed() {
            self.ctx.escalation.record_attempt(task, FixMode::Expensive, FixOutcome::Success, true);
            return Ok(State::LocalChecks { from: index + 1 });
        }

        self.ctx
            .escalation
            .record_attempt(task, FixMode::Expensive, failure_outcome(&outcome), true);
        self.ctx.set_excerpt(&rerun.failure_text());
        Ok(State::Failed(RemediationError::AutoFixBudgetExceeded {
            attempts: self.ctx.local_fix_attempts,
        }))
    }

    async fn commit_push(&mut self) -> Result<State> {
        if self.config.dry_run {
            let head = self.vcs.rev_parse("HEAD").await?;
            self.ctx.record_push(head, Utc::now());
            return Ok(State::CiPoll);
        }

        let options = CommitOptions {
            no_verify: self.config.no_verify,
            push: true,
        };
        // Not raced against cancellation: staging and committing must not be split.
        let outcome = self.committer.commit_and_maybe_push(None, options).await?;
        let pending_ci_fix = std::mem::take(&mut self.ctx.pending_ci_fix);

        match outcome.sha {
            Some(sha) if outcome.pushed => {
                info!(sha = %sha, "pushed, polling CI for the new commit");
                self.ctx.pending_commits = 0;
                self.ctx.record_push(sha, Utc::now());
            }
            Some(_) => {
                self.ctx.pending_commits += 1;
                let sha = self.push_pending().await?;
                info!(sha = %sha, "pushed on retry, polling CI for the new commit");
                self.ctx.record_push(sha, Utc::now());
            }
            None if pending_ci_fix => {
                self.ctx.ci_retries += 1;
                warn!(
                    ci_retries = self.ctx.ci_retries,
                    max_retries = self.config.max_retries,
                    "CI fix produced no commit"
                );
                if self.ctx.ci_retries >= self.config.max_retries {
                    return Ok(State::Failed(RemediationError::RetryBudgetExceeded {
                        attempts: self.ctx.ci_retries,
                    }));
                }
            }
            None => {
                if self.ctx.head_sha.is_empty() {
                    let head = self.vcs.rev_parse("HEAD").await?;
                    self.ctx.record_push(head, Utc::now());
                }
            }
        }
        Ok(State::CiPoll)
    }

    async fn ci_poll(&mut self) -> Result<State> {
        let lookup = self.monitor.find_matching_run(&self.ctx.head_sha, self.ctx.push_time, self.ctx.first_poll);
        let found = match cancellable(self.shutdown.clone(), lookup).await? {
            Ok(found) => found,
            Err(err) => return self.fetch_failed(err).await,
        };
        self.ctx.first_poll = false;

        let Some(run) = found else {
            self.ctx.fetch_failures = 0;
            let since = *self.ctx.not_found_since.get_or_insert_with(Instant::now);
            let waited = since.elapsed();
            if waited >= self.config.run_discovery_timeout() {
                return Ok(State::Failed(RemediationError::CiRunNotFound {
                    head_sha: self.ctx.head_sha.clone(),
                    waited,
                }));
            }
            info!(head_sha = %self.ctx.head_sha, "no CI run yet");
            self.sleep(RUN_NOT_FOUND_DELAY).await?;
            return Ok(State::CiPoll);
        };

        self.ctx.not_found_since = None;
        if self.ctx.current_run_id != Some(run.id) {
            self.ctx.current_run_id = Some(run.id);
            self.ctx.poll_attempt = 0;
        }
        self.ctx.last_run_url = Some(run.html_url.clone());
        info!(run_id = run.id, status = ?run.status, conclusion = ?run.conclusion, "CI run status");

        match run.status {
            RunStatus::Queued | RunStatus::Waiting => {
                self.ctx.fetch_failures = 0;
                self.wait_for_run(run.status, false).await?;
                Ok(State::CiPoll)
            }
            RunStatus::InProgress => self.poll_in_progress(run).await,
            RunStatus::Completed => self.handle_completed(run).await,
        }
    }

    async fn poll_in_progress(&mut self, run: WorkflowRun) -> Result<State> {
        let jobs = match self.monitor.get_jobs(run.id).await {
            Ok(jobs) => jobs,
            Err(err) => return self.fetch_failed(err).await,
        };
        self.ctx.fetch_failures = 0;

        let fresh: Vec<JobRecord> = jobs
            .iter()
            .filter(|j| j.failed() && !self.ctx.handled_jobs.contains(&j.id))
            .cloned()
            .collect();

        if !fresh.is_empty() {
            if self.config.dry_run {
                let excerpt = match self.collect_logs(&fresh).await {
                    Ok(excerpt) => excerpt,
                    Err(err) => return self.fetch_failed(err).await,
                };
                self.ctx.set_excerpt(&excerpt);
                return Ok(State::Failed(RemediationError::CiRunFailed { url: run.html_url }));
            }
            return Ok(State::JobFix {
                run,
                jobs: prioritize(fresh),
            });
        }

        let active = jobs.iter().any(JobRecord::is_active);
        self.wait_for_run(RunStatus::InProgress, active).await?;
        Ok(State::CiPoll)
    }

    async fn handle_completed(&mut self, run: WorkflowRun) -> Result<State> {
        if self.ctx.pending_commits > 0 && !self.config.dry_run {
            let commits = self.ctx.pending_commits;
            let sha = self.push_pending().await?;
            info!(sha = %sha, commits, run_succeeded = run.succeeded(), "pushed pending job fixes");
            self.ctx.record_push(sha, Utc::now());
            return Ok(State::CiPoll);
        }

        if run.succeeded() {
            self.ctx.fetch_failures = 0;
            info!(run_id = run.id, url = %run.html_url, "CI is green");
            return Ok(State::Done);
        }

        let jobs = match self.monitor.get_jobs(run.id).await {
            Ok(jobs) => jobs,
            Err(err) => return self.fetch_failed(err).await,
        };
        let failed = prioritize(jobs.into_iter().filter(JobRecord::failed).collect());
        if failed.is_empty() {
            warn!(run_id = run.id, conclusion = ?run.conclusion, "run failed without failed jobs");
            return Ok(State::Failed(RemediationError::CiRunFailed { url: run.html_url }));
        }

        let combined = match self.collect_logs(&failed).await {
            Ok(combined) => combined,
            Err(err) => return self.fetch_failed(err).await,
        };
        self.ctx.fetch_failures = 0;
        self.ctx.set_excerpt(&combined);
        if self.config.dry_run {
            return Ok(State::Failed(RemediationError::CiRunFailed { url: run.html_url }));
        }

        let fp = fingerprint(&combined);
        if self.ctx.seen_errors.contains(&fp) {
            warn!(run_id = run.id, fingerprint = %fp, "CI failure already seen");
            return Ok(State::Failed(RemediationError::DuplicateErrorDetected { fingerprint: fp }));
        }
        self.ctx.remember_failure(fp);

        if !self.ctx.remediated_runs.insert(run.id) {
            self.ctx.ci_retries += 1;
            info!(run_id = run.id, ci_retries = self.ctx.ci_retries, "run already remediated, re-polling");
            if self.ctx.ci_retries >= self.config.max_retries {
                return Ok(State::Failed(RemediationError::RetryBudgetExceeded {
                    attempts: self.ctx.ci_retries,
                }));
            }
            self.wait_for_run(RunStatus::InProgress, false).await?;
            return Ok(State::CiPoll);
        }

        self.snapshot(&format!("ci-run-{}", run.id)).await;
        let mode = self.ctx.escalation.select_mode(CI_REPO_TASK, &combined, self.config.force_mode);
        let outcome = self
            .dispatch(&prompts::repo_wide(&run, &combined), mode, DispatchKind::Batch, CI_REPO_TASK)
            .await?;
        self.ctx
            .escalation
            .record_attempt(CI_REPO_TASK, mode, outcome.outcome(), false);

        self.ctx.pending_ci_fix = true;
        Ok(State::LocalChecks { from: 0 })
    }

    async fn job_fix(&mut self, run: WorkflowRun, jobs: Vec<JobRecord>) -> Result<State> {
        for job in jobs {
            self.ctx.handled_jobs.insert(job.id);

            let log = match self.monitor.get_job_logs(job.id).await {
                Ok(log) => log,
                Err(err) => {
                    warn!(job = %job.name, error = %err, "could not fetch job log, skipping");
                    continue;
                }
            };
            let excerpt = extract_relevant_log(&log);
            self.ctx.set_excerpt(&excerpt);

            let fp = fingerprint(&excerpt);
            if !self.ctx.remember_failure(fp.clone()) {
                info!(job = %job.name, fingerprint = %fp, "job failure already seen, skipping");
                continue;
            }

            self.snapshot(&format!("job-{}", job.name)).await;
            let task = format!("job:{}", job.name);
            let mode = self.ctx.escalation.select_mode(&task, &excerpt, self.config.force_mode);
            let outcome = self
                .dispatch(&prompts::job_failure(&run, &job, &excerpt), mode, DispatchKind::Batch, &task)
                .await?;

            let _ticker = Ticker::start("verifying job fix", TICK_PERIOD, self.shutdown.clone());
            let report = cancellable(self.shutdown.clone(), self.runner.run(&self.steps)).await?;
            if !report.passed() {
                warn!(job = %job.name, "local checks fail after job fix, not committing");
                self.ctx
                    .escalation
                    .record_attempt(&task, mode, failure_outcome(&outcome), false);
                continue;
            }

            let options = CommitOptions {
                no_verify: self.config.no_verify,
                push: false,
            };
            let committed = self.committer.commit_and_maybe_push(None, options).await?;
            if committed.committed {
                self.ctx.pending_commits += 1;
                self.ctx.escalation.record_attempt(&task, mode, FixOutcome::Success, false);
                info!(job = %job.name, pending = self.ctx.pending_commits, "job fix committed");
            } else {
                self.ctx
                    .escalation
                    .record_attempt(&task, mode, failure_outcome(&outcome), false);
                info!(job = %job.name, "job fix produced no changes");
            }
        }

        self.wait_for_run(RunStatus::InProgress, true).await?;
        Ok(State::CiPoll)
    }

    /// Relevant excerpts of every job log. Fails if any log cannot be read.
    async fn collect_logs(&self, jobs: &[JobRecord]) -> Result<String> {
        let mut combined = String::new();
        for job in jobs {
            let log = self.monitor.get_job_logs(job.id).await?;
            combined.push_str(&format!("### {}\n{}\n\n", job.name, extract_relevant_log(&log)));
        }
        Ok(combined)
    }

    /// Push local commits, retrying failed pushes up to `max_retries` times.
    async fn push_pending(&mut self) -> Result<String> {
        let mut failures = 0;
        loop {
            match self.committer.push_pending().await {
                Ok(sha) => {
                    self.ctx.pending_commits = 0;
                    return Ok(sha);
                }
                Err(err) => {
                    failures += 1;
                    warn!(
                        error = %err,
                        failures,
                        pending = self.ctx.pending_commits,
                        "push failed, commits kept locally"
                    );
                    if failures >= self.config.max_retries {
                        return Err(err);
                    }
                    self.sleep(FETCH_BACKOFF).await?;
                }
            }
        }
    }

    async fn fetch_failed(&mut self, err: RemediationError) -> Result<State> {
        self.ctx.fetch_failures += 1;
        warn!(
            error = %err,
            failures = self.ctx.fetch_failures,
            max_retries = self.config.max_retries,
            "CI fetch failed"
        );
        if self.ctx.fetch_failures >= self.config.max_retries {
            return Ok(State::Failed(err));
        }
        self.sleep(FETCH_BACKOFF).await?;
        Ok(State::CiPoll)
    }

    async fn wait_for_run(&mut self, status: RunStatus, has_active_jobs: bool) -> Result<()> {
        let delay = poll_delay(status, self.ctx.poll_attempt, has_active_jobs);
        self.ctx.poll_attempt += 1;
        debug!(delay_ms = delay.as_millis() as u64, "waiting before next poll");
        self.sleep(delay).await
    }

    async fn sleep(&self, delay: Duration) -> Result<()> {
        cancellable(self.shutdown.clone(), tokio::time::sleep(delay)).await
    }

    async fn rerun(&self, step: &CheckStep) -> Result<CheckResult> {
        let _ticker = Ticker::start(format!("re-running {}", step.name), TICK_PERIOD, self.shutdown.clone());
        cancellable(self.shutdown.clone(), self.runner.run_step(step)).await
    }

    async fn dispatch(
        &self,
        prompt: &str,
        mode: FixMode,
        kind: DispatchKind,
        task: &str,
    ) -> Result<DispatchOutcome> {
        let _ticker = Ticker::start(format!("fixing {task}"), TICK_PERIOD, self.shutdown.clone());
        let outcome = cancellable(self.shutdown.clone(), self.dispatcher.dispatch(prompt, mode, kind)).await?;
        info!(task, %mode, exit_code = outcome.exit_code, timed_out = outcome.timed_out, "fix agent returned");
        Ok(outcome)
    }

    async fn snapshot(&mut self, label: &str) {
        match self.snapshots.take(label).await {
            Ok(path) => self.ctx.snapshots.push(path),
            Err(err) => warn!(label, error = %err, "snapshot failed"),
        }
    }

    fn finish(&self, state: State, started_at: DateTime<Utc>) -> SessionReport {
        let (status, failure) = match state {
            State::Failed(err) => {
                error!(kind = err.kind(), error = %err, "remediation failed");
                let run_url = match err {
                    RemediationError::CiRunFailed { .. }
                    | RemediationError::RetryBudgetExceeded { .. }
                    | RemediationError::DuplicateErrorDetected { .. }
                    | RemediationError::CiFetchFailure(_) => self.ctx.last_run_url.clone(),
                    _ => None,
                };
                let failure = FailureReport {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                    guidance: err.guidance().map(str::to_string),
                    excerpt: self.ctx.last_excerpt.clone(),
                    run_url,
                };
                (SessionStatus::Failed, Some(failure))
            }
            _ => {
                info!(attempts = self.ctx.escalation.history().len(), "remediation done");
                (SessionStatus::Done, None)
            }
        };

        SessionReport {
            session_id: self.ctx.session_id.clone(),
            status,
            failure,
            attempts: self.ctx.escalation.history().to_vec(),
            local_fix_attempts: self.ctx.local_fix_attempts,
            ci_retries: self.ctx.ci_retries,
            head_sha: self.ctx.head_sha.clone(),
            snapshots: self.ctx.snapshots.clone(),
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Outcome recorded for an attempt whose verification failed.
fn failure_outcome(dispatch: &DispatchOutcome) -> FixOutcome {
    if dispatch.timed_out {
        FixOutcome::Timeout
    } else {
        FixOutcome::Failure
    }
}
