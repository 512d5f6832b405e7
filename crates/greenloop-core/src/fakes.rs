//! In-memory fakes for the session's collaborators (testing only)
//!
//! Provides `ScriptedStepExecutor`, `ScriptedFixAgent`, `FakeVcs` and
//! `FakeCiProvider`, which satisfy the trait contracts without spawning
//! processes or touching the network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::agent::{AgentOutput, AgentRequest, FixAgent};
use crate::checks::StepExecutor;
use crate::ci::CiProvider;
use crate::domain::{CheckResult, CheckStep, JobRecord, RunConclusion, RunStatus, WorkflowRun};
use crate::error::{RemediationError, Result};
use crate::vcs::VcsClient;

/// Pop the next scripted value, repeating the last one once the queue drains.
fn next_sticky<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

// ---------------------------------------------------------------------------
// ScriptedStepExecutor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum StepScript {
    /// Fail with these outputs in order, then pass.
    Queue(VecDeque<String>),
    Always(String),
}

/// Step executor whose failures are scripted per step name. Unscripted steps pass.
#[derive(Debug, Default)]
pub struct ScriptedStepExecutor {
    scripts: Mutex<HashMap<String, StepScript>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedStepExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `step` once per entry in `outputs`, then pass.
    pub fn fail(&self, step: &str, outputs: impl IntoIterator<Item = impl Into<String>>) {
        let queue = outputs.into_iter().map(Into::into).collect();
        self.scripts
            .lock()
            .unwrap()
            .insert(step.to_string(), StepScript::Queue(queue));
    }

    /// Fail `step` with the same output forever.
    pub fn fail_always(&self, step: &str, output: impl Into<String>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(step.to_string(), StepScript::Always(output.into()));
    }

    /// Step names in execution order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepExecutor for ScriptedStepExecutor {
    async fn execute(&self, step: &CheckStep) -> CheckResult {
        self.calls.lock().unwrap().push(step.name.clone());

        let failure = match self.scripts.lock().unwrap().get_mut(&step.name) {
            Some(StepScript::Queue(queue)) => queue.pop_front(),
            Some(StepScript::Always(output)) => Some(output.clone()),
            None => None,
        };

        CheckResult {
            step_name: step.name.clone(),
            exit_code: if failure.is_some() { 1 } else { 0 },
            stdout: String::new(),
            stderr: failure.unwrap_or_default(),
            duration_ms: 1,
            timed_out: false,
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedFixAgent
// ---------------------------------------------------------------------------

type InvokeHook = Box<dyn Fn(&AgentRequest) + Send + Sync>;

/// Fix agent that records requests and returns a fixed result.
pub struct ScriptedFixAgent {
    exit_code: i32,
    stdout: String,
    delay: Option<Duration>,
    hook: Option<InvokeHook>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl Default for ScriptedFixAgent {
    fn default() -> Self {
        Self {
            exit_code: 0,
            stdout: String::new(),
            delay: None,
            hook: None,
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedFixAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Sleep this long (on the tokio clock) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Run `hook` on every invocation, e.g. to simulate edits.
    pub fn on_invoke(mut self, hook: impl Fn(&AgentRequest) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Every invocation leaves `vcs` dirty.
    pub fn touching(self, vcs: Arc<FakeVcs>) -> Self {
        self.on_invoke(move |_| vcs.set_dirty(true))
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FixAgent for ScriptedFixAgent {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentOutput> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(hook) = &self.hook {
            hook(request);
        }
        Ok(AgentOutput {
            exit_code: self.exit_code,
            stdout: self.stdout.clone(),
            stderr: String::new(),
        })
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeVcs
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct VcsState {
    dirty: bool,
    staged: bool,
    fail_next_commit: bool,
    push_failures: usize,
    commits: Vec<String>,
    pushes: usize,
}

/// In-memory working tree with a linear commit history.
#[derive(Debug, Default)]
pub struct FakeVcs {
    state: Mutex<VcsState>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic 40-char SHA of the `n`th commit (0 is the initial HEAD).
    pub fn sha_for(n: usize) -> String {
        format!("{n:040x}")
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.state.lock().unwrap().dirty = dirty;
    }

    pub fn fail_next_commit(&self) {
        self.state.lock().unwrap().fail_next_commit = true;
    }

    /// Make the next `times` pushes fail as if the remote were unreachable.
    pub fn fail_pushes(&self, times: usize) {
        self.state.lock().unwrap().push_failures = times;
    }

    pub fn commits(&self) -> Vec<String> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn push_count(&self) -> usize {
        self.state.lock().unwrap().pushes
    }

    pub fn has_staged_changes(&self) -> bool {
        self.state.lock().unwrap().staged
    }

    pub fn head(&self) -> String {
        Self::sha_for(self.state.lock().unwrap().commits.len())
    }
}

#[async_trait]
impl VcsClient for FakeVcs {
    async fn status(&self) -> Result<String> {
        let state = self.state.lock().unwrap();
        Ok(if state.dirty { " M src/lib.rs\n".to_string() } else { String::new() })
    }

    async fn diff(&self) -> Result<String> {
        let state = self.state.lock().unwrap();
        Ok(if state.dirty {
            "diff --git a/src/lib.rs b/src/lib.rs\n-old\n+new\n".to_string()
        } else {
            String::new()
        })
    }

    async fn add(&self, _paths: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.staged = state.dirty;
        Ok(())
    }

    async fn commit(&self, message: &str, _no_verify: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail_next_commit) {
            return Err(RemediationError::Vcs("pre-commit hook failed".to_string()));
        }
        if !state.staged {
            return Err(RemediationError::Vcs("nothing to commit".to_string()));
        }
        state.commits.push(message.to_string());
        state.dirty = false;
        state.staged = false;
        Ok(())
    }

    async fn push(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.push_failures > 0 {
            state.push_failures -= 1;
            return Err(RemediationError::Vcs(
                "fatal: unable to access remote: Could not resolve host: github.com".to_string(),
            ));
        }
        state.pushes += 1;
        Ok(())
    }

    async fn rev_parse(&self, _reference: &str) -> Result<String> {
        Ok(self.head())
    }

    async fn remote_url(&self) -> Result<String> {
        Ok("git@github.com:octo/widgets.git".to_string())
    }

    async fn current_branch(&self) -> Result<String> {
        Ok("main".to_string())
    }

    async fn reset_staged(&self) -> Result<()> {
        self.state.lock().unwrap().staged = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeCiProvider
// ---------------------------------------------------------------------------

/// Scripted CI provider. Every script is a queue whose last entry repeats.
#[derive(Debug, Default)]
pub struct FakeCiProvider {
    runs: Mutex<VecDeque<Vec<WorkflowRun>>>,
    jobs: Mutex<HashMap<u64, VecDeque<Vec<JobRecord>>>>,
    logs: Mutex<HashMap<u64, VecDeque<String>>>,
    list_failures: AtomicU32,
    job_failures: AtomicU32,
    list_calls: AtomicUsize,
    job_calls: AtomicUsize,
    log_calls: AtomicUsize,
}

impl FakeCiProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the response of the next `list_runs` call.
    pub fn push_runs(&self, runs: Vec<WorkflowRun>) {
        self.runs.lock().unwrap().push_back(runs);
    }

    pub fn push_jobs(&self, run_id: u64, jobs: Vec<JobRecord>) {
        self.jobs
            .lock()
            .unwrap()
            .entry(run_id)
            .or_default()
            .push_back(jobs);
    }

    pub fn push_log(&self, job_id: u64, log: impl Into<String>) {
        self.logs
            .lock()
            .unwrap()
            .entry(job_id)
            .or_default()
            .push_back(log.into());
    }

    /// Make the next `times` calls to `list_runs` fail.
    pub fn fail_list_runs(&self, times: u32) {
        self.list_failures.store(times, Ordering::SeqCst);
    }

    /// Make the next `times` calls to `get_run_jobs` fail.
    pub fn fail_run_jobs(&self, times: u32) {
        self.job_failures.store(times, Ordering::SeqCst);
    }

    pub fn job_calls(&self) -> usize {
        self.job_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn log_calls(&self) -> usize {
        self.log_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CiProvider for FakeCiProvider {
    async fn list_runs(&self, limit: u32) -> Result<Vec<WorkflowRun>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .list_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RemediationError::CiFetchFailure("502 Bad Gateway".to_string()));
        }

        let mut queue = self.runs.lock().unwrap();
        let mut runs = next_sticky(&mut *queue).unwrap_or_default();
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn get_run_jobs(&self, run_id: u64) -> Result<Vec<JobRecord>> {
        self.job_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .job_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RemediationError::CiFetchFailure("503 Service Unavailable".to_string()));
        }

        let mut jobs = self.jobs.lock().unwrap();
        Ok(jobs.get_mut(&run_id).and_then(next_sticky).unwrap_or_default())
    }

    async fn get_job_log(&self, job_id: u64) -> Result<String> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        let mut logs = self.logs.lock().unwrap();
        logs.get_mut(&job_id)
            .and_then(next_sticky)
            .ok_or_else(|| RemediationError::CiFetchFailure(format!("no log for job {job_id}")))
    }
}

/// Workflow run fixture created now.
pub fn workflow_run(
    id: u64,
    head_sha: &str,
    status: RunStatus,
    conclusion: Option<RunConclusion>,
) -> WorkflowRun {
    WorkflowRun {
        id,
        name: "CI".to_string(),
        status,
        conclusion,
        head_sha: head_sha.to_string(),
        created_at: Utc::now(),
        html_url: format!("https://github.com/octo/widgets/actions/runs/{id}"),
    }
}

/// Job fixture.
pub fn job(id: u64, name: &str, status: RunStatus, conclusion: Option<RunConclusion>) -> JobRecord {
    JobRecord::new(id, name, status, conclusion)
}
