//! Failed-job prioritisation and log excerpting.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::JobRecord;

/// Priority of jobs whose name matches no pattern.
pub const DEFAULT_PRIORITY: u32 = 50;

/// Lines kept from the first error marker onward.
const MAX_ERROR_LINES: usize = 200;

/// Lines kept from the end when no error marker is found.
const FALLBACK_TAIL_LINES: usize = 100;

/// Name patterns checked in order; the first hit decides the priority.
const PRIORITY_TABLE: &[(&[&str], u32)] = &[
    (&["build", "compile"], 100),
    (&["typecheck", "type-check", "tsc", "types"], 90),
    (&["lint", "clippy", "fmt", "format", "eslint"], 80),
    (&["e2e", "end-to-end", "playwright", "cypress"], 50),
    (&["integration"], 60),
    (&["coverage", "report"], 40),
    (&["unit", "test"], 70),
];

/// Blocking priority for a job name; higher is fixed first.
pub fn priority_for(job_name: &str) -> u32 {
    let name = job_name.to_lowercase();
    PRIORITY_TABLE
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|p| name.contains(p)))
        .map(|(_, priority)| *priority)
        .unwrap_or(DEFAULT_PRIORITY)
}

/// Stable sort by priority, highest first.
pub fn prioritize(mut jobs: Vec<JobRecord>) -> Vec<JobRecord> {
    jobs.sort_by(|a, b| b.priority.cmp(&a.priority));
    jobs
}

/// Infrastructure chatter that never explains a failure.
const NOISE_PATTERNS: &[&str] = &[
    "##[group]",
    "##[endgroup]",
    "Current runner version",
    "Runner Image",
    "Operating System",
    "Included Software",
    "Image Release",
    "GITHUB_TOKEN Permissions",
    "Secret source",
    "Prepare workflow directory",
    "Prepare all required actions",
    "Getting action download info",
    "Download action repository",
    "Complete job name",
    "Cleaning up orphan processes",
    "Post job cleanup",
    "git version",
    "Syncing repository",
    "Temporarily overriding HOME",
    "Adding repository directory",
    "[command]/usr/bin/git",
];

fn timestamp_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?Z ?").expect("valid timestamp regex")
    })
}

fn error_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(error|failed|failure|panicked)\b|##\[error\]|✗|✖").expect("valid marker regex")
    })
}

fn is_noise(line: &str) -> bool {
    NOISE_PATTERNS.iter().any(|p| line.contains(p))
}

/// Reduce a raw job log to the part worth showing the fix agent.
///
/// Timestamps are stripped and runner chatter dropped. Output starts at the
/// first error marker (at most 200 lines); without a marker the last 100
/// lines are returned.
pub fn extract_relevant_log(raw: &str) -> String {
    let cleaned: Vec<String> = raw
        .lines()
        .map(|line| timestamp_prefix().replace(line, "").into_owned())
        .filter(|line| !is_noise(line))
        .collect();

    let selected: &[String] = match cleaned.iter().position(|l| error_marker().is_match(l)) {
        Some(start) => {
            let end = (start + MAX_ERROR_LINES).min(cleaned.len());
            &cleaned[start..end]
        }
        None => {
            let start = cleaned.len().saturating_sub(FALLBACK_TAIL_LINES);
            &cleaned[start..]
        }
    };
    selected.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunConclusion, RunStatus};

    fn job(id: u64, name: &str) -> JobRecord {
        JobRecord::new(id, name, RunStatus::Completed, Some(RunConclusion::Failure))
    }

    #[test]
    fn test_priority_table() {
        assert_eq!(priority_for("Build (macos)"), 100);
        assert_eq!(priority_for("typecheck"), 90);
        assert_eq!(priority_for("clippy"), 80);
        assert_eq!(priority_for("unit-tests"), 70);
        assert_eq!(priority_for("integration tests"), 60);
        assert_eq!(priority_for("e2e tests"), 50);
        assert_eq!(priority_for("coverage"), 40);
        assert_eq!(priority_for("deploy-preview"), DEFAULT_PRIORITY);
    }

    #[test]
    fn test_prioritize_orders_blocking_jobs_first() {
        let ordered = prioritize(vec![job(1, "e2e"), job(2, "lint"), job(3, "build")]);
        let names: Vec<&str> = ordered.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["build", "lint", "e2e"]);
    }

    #[test]
    fn test_prioritize_is_stable_for_equal_priority() {
        let ordered = prioritize(vec![job(1, "e2e"), job(2, "deploy"), job(3, "cypress")]);
        let ids: Vec<u64> = ordered.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_extract_starts_at_first_error() {
        let raw = "\
2026-03-01T12:00:00.1234567Z ##[group]Run actions/checkout@v4
2026-03-01T12:00:01.0000000Z Syncing repository: o/r
2026-03-01T12:00:02.0000000Z Compiling widgets v0.1.0
2026-03-01T12:00:03.0000000Z error[E0425]: cannot find value `x` in this scope
2026-03-01T12:00:03.0000000Z   --> src/lib.rs:3:5
2026-03-01T12:00:04.0000000Z ##[endgroup]";
        let excerpt = extract_relevant_log(raw);
        assert_eq!(
            excerpt,
            "error[E0425]: cannot find value `x` in this scope\n  --> src/lib.rs:3:5"
        );
    }

    #[test]
    fn test_extract_falls_back_to_tail() {
        let raw: String = (0..150).map(|i| format!("step {i} ok\n")).collect();
        let excerpt = extract_relevant_log(&raw);
        let lines: Vec<&str> = excerpt.lines().collect();
        assert_eq!(lines.len(), 100);
        assert_eq!(lines[0], "step 50 ok");
        assert_eq!(lines[99], "step 149 ok");
    }

    #[test]
    fn test_extract_caps_error_section() {
        let raw: String = std::iter::once("FAILED tests::a\n".to_string())
            .chain((0..500).map(|i| format!("detail {i}\n")))
            .collect();
        assert_eq!(extract_relevant_log(&raw).lines().count(), MAX_ERROR_LINES);
    }

    #[test]
    fn test_marker_needs_word_boundary() {
        assert!(!error_marker().is_match("errorless output"));
        assert!(error_marker().is_match("thread 'main' panicked at src/main.rs"));
        assert!(error_marker().is_match("##[error]Process completed with exit code 1."));
    }
}
