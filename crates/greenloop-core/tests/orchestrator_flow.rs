use std::sync::Arc;
use std::time::Duration;

use greenloop_core::fakes::{job, workflow_run, FakeCiProvider, FakeVcs, ScriptedFixAgent, ScriptedStepExecutor};
use greenloop_core::{
    CheckStep, Collaborators, FixMode, FixOutcome, Orchestrator, RemediationConfig, RunConclusion,
    RunStatus, SessionReport, SessionStatus,
};
use tempfile::TempDir;
use tokio::sync::watch;

fn base_config() -> RemediationConfig {
    RemediationConfig {
        generate_commit_messages: false,
        ..Default::default()
    }
}

fn npm_steps(names: &[&str]) -> Vec<CheckStep> {
    names
        .iter()
        .map(|name| CheckStep::new(*name, "npm", ["run", name]))
        .collect()
}

struct Session {
    orchestrator: Orchestrator,
    _state: TempDir,
    _shutdown: watch::Sender<bool>,
}

fn session(
    config: RemediationConfig,
    steps: Vec<CheckStep>,
    executor: &Arc<ScriptedStepExecutor>,
    agent: &Arc<ScriptedFixAgent>,
    vcs: &Arc<FakeVcs>,
    ci: &Arc<FakeCiProvider>,
) -> Session {
    let state = tempfile::tempdir().unwrap();
    let (tx, rx) = watch::channel(false);
    let deps = Collaborators {
        executor: executor.clone(),
        agent: agent.clone(),
        vcs: vcs.clone(),
        ci: ci.clone(),
    };
    Session {
        orchestrator: Orchestrator::new(config, steps, deps, state.path(), rx),
        _state: state,
        _shutdown: tx,
    }
}

fn failure_kind(report: &SessionReport) -> &str {
    report
        .failure
        .as_ref()
        .map(|f| f.kind.as_str())
        .unwrap_or("none")
}

#[tokio::test(start_paused = true)]
async fn identical_failure_gets_exactly_one_fix_attempt() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    executor.fail_always("lint", "src/app.ts:4:2 error 'x' is defined but never used");
    let agent = Arc::new(ScriptedFixAgent::new());
    let vcs = Arc::new(FakeVcs::new());
    let ci = Arc::new(FakeCiProvider::new());

    let mut s = session(base_config(), npm_steps(&["lint"]), &executor, &agent, &vcs, &ci);
    let report = s.orchestrator.run().await;

    assert_eq!(report.status, SessionStatus::Failed);
    assert_eq!(failure_kind(&report), "duplicate_error_detected");
    assert_eq!(agent.requests().len(), 1);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].outcome, FixOutcome::Failure);
    assert!(vcs.commits().is_empty());
    assert_eq!(ci.list_calls(), 0);
    assert!(report.failure.unwrap().excerpt.contains("never used"));
}

#[tokio::test(start_paused = true)]
async fn auto_fix_budget_allows_one_manual_escalation() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    executor.fail(
        "lint",
        [
            "error: missing semicolon",
            "error: unused import",
            "error: type mismatch",
            "error: undefined name",
        ],
    );
    let agent = Arc::new(ScriptedFixAgent::new());
    let vcs = Arc::new(FakeVcs::new());
    let ci = Arc::new(FakeCiProvider::new());
    let config = RemediationConfig {
        max_auto_fixes: 2,
        ..base_config()
    };

    let mut s = session(config, npm_steps(&["lint"]), &executor, &agent, &vcs, &ci);
    let report = s.orchestrator.run().await;

    assert_eq!(failure_kind(&report), "auto_fix_budget_exceeded");
    assert_eq!(report.local_fix_attempts, 2);

    let requests = agent.requests();
    assert_eq!(requests.len(), 3);
    assert!(!requests[0].interactive);
    assert!(!requests[1].interactive);
    assert!(requests[2].interactive);
    assert_eq!(requests[2].mode, FixMode::Expensive);

    assert_eq!(report.attempts.len(), 3);
    assert!(report.attempts[2].interactive);
    assert!(report.attempts.iter().all(|a| a.outcome == FixOutcome::Failure));
}

#[tokio::test(start_paused = true)]
async fn install_lint_test_flow_reaches_done() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    executor.fail("lint", ["src/index.ts:3:7 error Missing semicolon"]);
    let vcs = Arc::new(FakeVcs::new());
    let agent = Arc::new(ScriptedFixAgent::new().touching(vcs.clone()));
    let ci = Arc::new(FakeCiProvider::new());
    ci.push_runs(vec![workflow_run(
        1,
        &FakeVcs::sha_for(1),
        RunStatus::Completed,
        Some(RunConclusion::Success),
    )]);

    let mut s = session(
        base_config(),
        npm_steps(&["install", "lint", "test"]),
        &executor,
        &agent,
        &vcs,
        &ci,
    );
    let report = s.orchestrator.run().await;

    assert!(report.succeeded(), "unexpected failure: {:?}", report.failure);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].task_key, "local:lint");
    assert_eq!(report.attempts[0].outcome, FixOutcome::Success);
    assert_eq!(executor.calls(), vec!["install", "lint", "lint", "test"]);
    assert_eq!(vcs.commits().len(), 1);
    assert_eq!(vcs.push_count(), 1);
    assert_eq!(report.head_sha, FakeVcs::sha_for(1));
    assert_eq!(report.snapshots.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_counter_resets_after_job_fix_push() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    let vcs = Arc::new(FakeVcs::new());
    let vcs_hook = vcs.clone();
    let agent = Arc::new(ScriptedFixAgent::new().on_invoke(move |request| {
        if request.prompt.contains("CI job `lint`") {
            vcs_hook.set_dirty(true);
        }
    }));

    let sha0 = FakeVcs::sha_for(0);
    let sha1 = FakeVcs::sha_for(1);
    let failed = Some(RunConclusion::Failure);
    let run0 = workflow_run(100, &sha0, RunStatus::Completed, failed);

    let ci = Arc::new(FakeCiProvider::new());
    // Repository-wide fix without changes, then the same run re-run in place.
    ci.push_runs(vec![run0.clone()]);
    ci.push_runs(vec![run0.clone()]);
    // A new run for the same commit fails a job while still in progress.
    ci.push_runs(vec![workflow_run(101, &sha0, RunStatus::InProgress, None), run0.clone()]);
    ci.push_runs(vec![workflow_run(101, &sha0, RunStatus::Completed, failed), run0.clone()]);
    ci.push_runs(vec![
        workflow_run(102, &sha1, RunStatus::Completed, Some(RunConclusion::Success)),
        run0,
    ]);
    ci.push_jobs(100, vec![job(1, "unit tests", RunStatus::Completed, failed)]);
    ci.push_log(1, "error: test_alpha failed");
    ci.push_log(1, "error: test_beta failed");
    ci.push_jobs(
        101,
        vec![
            job(2, "lint", RunStatus::Completed, failed),
            job(3, "unit tests", RunStatus::InProgress, None),
        ],
    );
    ci.push_log(2, "src/main.rs:10:5 error: unused variable `x`");

    let config = RemediationConfig {
        max_retries: 5,
        ..base_config()
    };
    let mut s = session(config, npm_steps(&["test"]), &executor, &agent, &vcs, &ci);
    let report = s.orchestrator.run().await;

    assert!(report.succeeded(), "unexpected failure: {:?}", report.failure);
    assert_eq!(report.ci_retries, 0);
    assert_eq!(report.head_sha, sha1);
    assert_eq!(vcs.commits().len(), 1);
    assert_eq!(vcs.push_count(), 1);

    let tasks: Vec<&str> = report.attempts.iter().map(|a| a.task_key.as_str()).collect();
    assert_eq!(tasks, vec!["ci:repo", "job:lint"]);
    assert_eq!(agent.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn repeated_fetch_failures_end_the_session() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    let agent = Arc::new(ScriptedFixAgent::new());
    let vcs = Arc::new(FakeVcs::new());
    let ci = Arc::new(FakeCiProvider::new());
    ci.fail_list_runs(10);

    let mut s = session(base_config(), npm_steps(&["test"]), &executor, &agent, &vcs, &ci);
    let report = s.orchestrator.run().await;

    assert_eq!(failure_kind(&report), "ci_fetch_failure");
    assert_eq!(ci.list_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn missing_run_fails_after_discovery_timeout() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    let agent = Arc::new(ScriptedFixAgent::new());
    let vcs = Arc::new(FakeVcs::new());
    let ci = Arc::new(FakeCiProvider::new());
    ci.push_runs(Vec::new());

    let mut config = base_config();
    config.ci.run_discovery_timeout_secs = 60;
    let mut s = session(config, npm_steps(&["test"]), &executor, &agent, &vcs, &ci);
    let report = s.orchestrator.run().await;

    assert_eq!(failure_kind(&report), "ci_run_not_found");
    assert!(ci.list_calls() >= 7);
    assert_eq!(report.ci_retries, 0);
}

#[tokio::test(start_paused = true)]
async fn dry_run_never_dispatches_or_commits() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    executor.fail_always("lint", "error: missing semicolon");
    let agent = Arc::new(ScriptedFixAgent::new());
    let vcs = Arc::new(FakeVcs::new());
    let ci = Arc::new(FakeCiProvider::new());
    let config = RemediationConfig {
        dry_run: true,
        ..base_config()
    };

    let mut s = session(config, npm_steps(&["lint"]), &executor, &agent, &vcs, &ci);
    let report = s.orchestrator.run().await;

    assert_eq!(failure_kind(&report), "local_check_failure");
    assert!(agent.requests().is_empty());
    assert!(vcs.commits().is_empty());
    assert!(report.snapshots.is_empty());
}

#[tokio::test(start_paused = true)]
async fn dry_run_reports_failed_ci_run_with_url() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    let agent = Arc::new(ScriptedFixAgent::new());
    let vcs = Arc::new(FakeVcs::new());
    let ci = Arc::new(FakeCiProvider::new());
    let failed = Some(RunConclusion::Failure);
    ci.push_runs(vec![workflow_run(7, &FakeVcs::sha_for(0), RunStatus::Completed, failed)]);
    ci.push_jobs(7, vec![job(70, "build", RunStatus::Completed, failed)]);
    ci.push_log(70, "error[E0308]: mismatched types");

    let config = RemediationConfig {
        dry_run: true,
        ..base_config()
    };
    let mut s = session(config, npm_steps(&["test"]), &executor, &agent, &vcs, &ci);
    let report = s.orchestrator.run().await;

    let failure = report.failure.expect("dry run should fail on a red run");
    assert_eq!(failure.kind, "ci_run_failed");
    assert_eq!(
        failure.run_url.as_deref(),
        Some("https://github.com/octo/widgets/actions/runs/7")
    );
    assert!(failure.excerpt.contains("mismatched types"));
    assert!(agent.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn watch_mode_skips_local_checks() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    let agent = Arc::new(ScriptedFixAgent::new());
    let vcs = Arc::new(FakeVcs::new());
    let ci = Arc::new(FakeCiProvider::new());
    ci.push_runs(vec![workflow_run(
        3,
        &FakeVcs::sha_for(0),
        RunStatus::Completed,
        Some(RunConclusion::Success),
    )]);
    let config = RemediationConfig {
        watch: true,
        ..base_config()
    };

    let mut s = session(config, npm_steps(&["lint", "test"]), &executor, &agent, &vcs, &ci);
    let report = s.orchestrator.run().await;

    assert!(report.succeeded());
    assert!(executor.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn queued_run_is_polled_until_green() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    let agent = Arc::new(ScriptedFixAgent::new());
    let vcs = Arc::new(FakeVcs::new());
    let ci = Arc::new(FakeCiProvider::new());
    let sha0 = FakeVcs::sha_for(0);
    ci.push_runs(vec![workflow_run(4, &sha0, RunStatus::Queued, None)]);
    ci.push_runs(vec![workflow_run(4, &sha0, RunStatus::InProgress, None)]);
    ci.push_runs(vec![workflow_run(4, &sha0, RunStatus::Completed, Some(RunConclusion::Success))]);
    ci.push_jobs(4, vec![job(40, "build", RunStatus::InProgress, None)]);

    let mut s = session(base_config(), npm_steps(&["test"]), &executor, &agent, &vcs, &ci);
    let started = tokio::time::Instant::now();
    let report = s.orchestrator.run().await;

    assert!(report.succeeded());
    assert_eq!(ci.list_calls(), 3);
    // 30 s for the queued poll plus 5 s for the first in-progress poll.
    assert!(started.elapsed() >= std::time::Duration::from_secs(35));
}

#[tokio::test]
async fn cancelled_session_fails_immediately() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    let agent = Arc::new(ScriptedFixAgent::new());
    let vcs = Arc::new(FakeVcs::new());
    let ci = Arc::new(FakeCiProvider::new());
    let state = tempfile::tempdir().unwrap();
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let deps = Collaborators {
        executor: executor.clone(),
        agent,
        vcs,
        ci,
    };
    let mut orchestrator = Orchestrator::new(base_config(), npm_steps(&["test"]), deps, state.path(), rx);
    let report = orchestrator.run().await;

    assert_eq!(failure_kind(&report), "cancelled");
    assert!(executor.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn session_report_is_persisted_with_digest() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    executor.fail_always("lint", "error: boom");
    let agent = Arc::new(ScriptedFixAgent::new());
    let vcs = Arc::new(FakeVcs::new());
    let ci = Arc::new(FakeCiProvider::new());

    let mut s = session(base_config(), npm_steps(&["lint"]), &executor, &agent, &vcs, &ci);
    let report = s.orchestrator.run().await;

    let path = s.orchestrator.session_dir().join("session.json");
    let stored: SessionReport = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(stored, report);
    assert!(path.with_extension("digest").exists());
    assert_eq!(stored.session_id, s.orchestrator.session_id());
}

#[tokio::test(start_paused = true)]
async fn failing_job_fetches_end_the_session() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    let agent = Arc::new(ScriptedFixAgent::new());
    let vcs = Arc::new(FakeVcs::new());
    let ci = Arc::new(FakeCiProvider::new());
    ci.push_runs(vec![workflow_run(8, &FakeVcs::sha_for(0), RunStatus::InProgress, None)]);
    ci.fail_run_jobs(u32::MAX);

    let mut s = session(base_config(), npm_steps(&["test"]), &executor, &agent, &vcs, &ci);
    let report = tokio::time::timeout(Duration::from_secs(24 * 3600), s.orchestrator.run())
        .await
        .expect("session must terminate");

    assert_eq!(failure_kind(&report), "ci_fetch_failure");
    assert_eq!(ci.job_calls(), 3);
    assert_eq!(ci.list_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn unreadable_job_log_is_retried_not_fixed() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    let agent = Arc::new(ScriptedFixAgent::new());
    let vcs = Arc::new(FakeVcs::new());
    let ci = Arc::new(FakeCiProvider::new());
    let failed = Some(RunConclusion::Failure);
    ci.push_runs(vec![workflow_run(9, &FakeVcs::sha_for(0), RunStatus::Completed, failed)]);
    ci.push_jobs(9, vec![job(90, "build", RunStatus::Completed, failed)]);

    let mut s = session(base_config(), npm_steps(&["test"]), &executor, &agent, &vcs, &ci);
    let report = s.orchestrator.run().await;

    assert_eq!(failure_kind(&report), "ci_fetch_failure");
    assert_eq!(ci.log_calls(), 3);
    assert!(agent.requests().is_empty());
    assert!(report.snapshots.is_empty());
}

#[tokio::test(start_paused = true)]
async fn push_failure_is_retried_after_commit() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    executor.fail("lint", ["src/index.ts:3:7 error Missing semicolon"]);
    let vcs = Arc::new(FakeVcs::new());
    vcs.fail_pushes(1);
    let agent = Arc::new(ScriptedFixAgent::new().touching(vcs.clone()));
    let ci = Arc::new(FakeCiProvider::new());
    ci.push_runs(vec![workflow_run(
        1,
        &FakeVcs::sha_for(1),
        RunStatus::Completed,
        Some(RunConclusion::Success),
    )]);

    let mut s = session(base_config(), npm_steps(&["install", "lint"]), &executor, &agent, &vcs, &ci);
    let report = s.orchestrator.run().await;

    assert!(report.succeeded(), "unexpected failure: {:?}", report.failure);
    assert_eq!(vcs.commits().len(), 1);
    assert_eq!(vcs.push_count(), 1);
    assert_eq!(report.head_sha, FakeVcs::sha_for(1));
}

#[tokio::test(start_paused = true)]
async fn unreachable_remote_fails_after_push_retries() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    executor.fail("lint", ["src/index.ts:3:7 error Missing semicolon"]);
    let vcs = Arc::new(FakeVcs::new());
    vcs.fail_pushes(10);
    let agent = Arc::new(ScriptedFixAgent::new().touching(vcs.clone()));
    let ci = Arc::new(FakeCiProvider::new());

    let mut s = session(base_config(), npm_steps(&["lint"]), &executor, &agent, &vcs, &ci);
    let started = tokio::time::Instant::now();
    let report = s.orchestrator.run().await;

    assert_eq!(failure_kind(&report), "vcs");
    assert!(report.failure.unwrap().message.contains("Could not resolve host"));
    assert_eq!(vcs.commits().len(), 1);
    assert_eq!(vcs.push_count(), 0);
    assert_eq!(ci.list_calls(), 0);
    // Two backoffs between the three push attempts after the initial one.
    assert!(started.elapsed() >= Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn same_ci_failure_after_fix_push_stops_session() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    let vcs = Arc::new(FakeVcs::new());
    let agent = Arc::new(ScriptedFixAgent::new().touching(vcs.clone()));
    let failed = Some(RunConclusion::Failure);
    let run1 = workflow_run(1, &FakeVcs::sha_for(0), RunStatus::Completed, failed);
    let run2 = workflow_run(2, &FakeVcs::sha_for(1), RunStatus::Completed, failed);

    let ci = Arc::new(FakeCiProvider::new());
    ci.push_runs(vec![run1.clone()]);
    ci.push_runs(vec![run2, run1]);
    ci.push_jobs(1, vec![job(10, "unit tests", RunStatus::Completed, failed)]);
    ci.push_jobs(2, vec![job(20, "unit tests", RunStatus::Completed, failed)]);
    ci.push_log(10, "error: assertion failed at tests/api.rs:10:5");
    ci.push_log(20, "error: assertion failed at tests/api.rs:12:9");

    let mut s = session(base_config(), npm_steps(&["test"]), &executor, &agent, &vcs, &ci);
    let report = s.orchestrator.run().await;

    let failure = report.failure.clone().expect("repeated CI failure must stop the session");
    assert_eq!(failure.kind, "duplicate_error_detected");
    assert_eq!(
        failure.run_url.as_deref(),
        Some("https://github.com/octo/widgets/actions/runs/2")
    );
    assert_eq!(agent.requests().len(), 1);
    assert_eq!(vcs.commits().len(), 1);
    assert_eq!(vcs.push_count(), 1);
    assert_eq!(report.head_sha, FakeVcs::sha_for(1));
}

#[tokio::test(start_paused = true)]
async fn ci_fixes_without_commits_exhaust_retry_budget() {
    let executor = Arc::new(ScriptedStepExecutor::new());
    let agent = Arc::new(ScriptedFixAgent::new());
    let vcs = Arc::new(FakeVcs::new());
    let failed = Some(RunConclusion::Failure);

    let ci = Arc::new(FakeCiProvider::new());
    ci.push_runs(vec![workflow_run(5, &FakeVcs::sha_for(0), RunStatus::Completed, failed)]);
    ci.push_jobs(5, vec![job(50, "lint", RunStatus::Completed, failed)]);
    ci.push_log(50, "error: rule no-unused-vars");
    ci.push_log(50, "error: rule eqeqeq");

    let config = RemediationConfig {
        max_retries: 2,
        ..base_config()
    };
    let mut s = session(config, npm_steps(&["lint"]), &executor, &agent, &vcs, &ci);
    let report = s.orchestrator.run().await;

    assert_eq!(failure_kind(&report), "retry_budget_exceeded");
    assert_eq!(report.ci_retries, 2);
    assert_eq!(agent.requests().len(), 1);
    assert!(vcs.commits().is_empty());
    assert_eq!(
        report.failure.unwrap().run_url.as_deref(),
        Some("https://github.com/octo/widgets/actions/runs/5")
    );
}
