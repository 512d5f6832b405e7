//! Prompt templates sent to the fix agent.

use crate::domain::{CheckStep, JobRecord, WorkflowRun};

/// Failure output included in a prompt is cut to this many trailing chars.
const MAX_CONTEXT_CHARS: usize = 8_000;

/// Diffs included in the commit-message prompt are cut to this many chars.
const MAX_DIFF_CHARS: usize = 12_000;

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    let byte_index = text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &text[byte_index..]
}

fn head(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// Fix a failing local verification step.
pub fn local_failure(step: &CheckStep, failure_text: &str) -> String {
    format!(
        "The local check `{name}` (`{command}`) is failing. Fix the code so that the check passes. \
         Do not disable the check, skip tests, or weaken lint rules.\n\n\
         Output of the failing check:\n```\n{output}\n```\n",
        name = step.name,
        command = step.command_line(),
        output = tail(failure_text, MAX_CONTEXT_CHARS),
    )
}

/// Last-resort interactive session for a step that automated fixes could not repair.
pub fn manual_escalation(step: &CheckStep, failure_text: &str, attempts: u32) -> String {
    format!(
        "Automated fixes failed {attempts} times for the local check `{name}` (`{command}`). \
         Work through the failure carefully, explain the root cause, and fix it.\n\n\
         Latest output:\n```\n{output}\n```\n",
        name = step.name,
        command = step.command_line(),
        output = tail(failure_text, MAX_CONTEXT_CHARS),
    )
}

/// Fix one failed CI job while the run is still in progress.
pub fn job_failure(run: &WorkflowRun, job: &JobRecord, log_excerpt: &str) -> String {
    format!(
        "The CI job `{job}` in workflow `{workflow}` failed for commit {sha}. \
         Fix the underlying problem in the repository. Do not edit CI configuration to hide the failure.\n\n\
         Relevant log excerpt:\n```\n{log}\n```\n",
        job = job.name,
        workflow = run.name,
        sha = run.head_sha,
        log = tail(log_excerpt, MAX_CONTEXT_CHARS),
    )
}

/// Repository-wide fix for a completed, failed run.
pub fn repo_wide(run: &WorkflowRun, combined_logs: &str) -> String {
    format!(
        "The CI workflow `{workflow}` failed for commit {sha} ({url}). \
         Fix every failure shown below across the repository, then make sure the local checks still pass.\n\n\
         Failed job logs:\n{logs}\n",
        workflow = run.name,
        sha = run.head_sha,
        url = run.html_url,
        logs = tail(combined_logs, MAX_CONTEXT_CHARS),
    )
}

/// Ask for a conventional commit subject line.
pub fn commit_message(diff: &str) -> String {
    format!(
        "Write a single-line conventional commit message (max 72 characters) describing this diff. \
         Output only the message.\n\n```diff\n{}\n```\n",
        head(diff, MAX_DIFF_CHARS)
    )
}
