//! Remediation error taxonomy.
//!
//! Subprocess and network failures are converted into one of these kinds at
//! the point where they happen; only the startup preflight lets
//! [`RemediationError::ToolMissing`] and [`RemediationError::FixAgentUnavailable`]
//! escape to the caller unchanged.

use std::time::Duration;

/// Errors produced by the remediation engine.
#[derive(Debug, thiserror::Error)]
pub enum RemediationError {
    #[error("local check '{step}' failed with exit code {exit_code}")]
    LocalCheckFailure { step: String, exit_code: i32 },

    #[error("duplicate error detected (fingerprint {fingerprint}); the same failure reappeared unchanged")]
    DuplicateErrorDetected { fingerprint: String },

    #[error("fix agent timed out after {}s", .0.as_secs())]
    FixAgentTimeout(Duration),

    #[error("fix agent '{command}' is unavailable: {hint}")]
    FixAgentUnavailable { command: String, hint: String },

    #[error("required tool '{tool}' is missing: {hint}")]
    ToolMissing { tool: String, hint: String },

    #[error("CI fetch failed: {0}")]
    CiFetchFailure(String),

    #[error("no CI run found for commit {head_sha} after waiting {}s", .waited.as_secs())]
    CiRunNotFound { head_sha: String, waited: Duration },

    #[error("CI run failed: {url}")]
    CiRunFailed { url: String },

    #[error("CI retry budget exceeded after {attempts} attempts without a fresh commit")]
    RetryBudgetExceeded { attempts: u32 },

    #[error("auto-fix budget exceeded after {attempts} attempts")]
    AutoFixBudgetExceeded { attempts: u32 },

    #[error("git error: {0}")]
    Vcs(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("remediation cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    TaskFailed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemediationError {
    /// Stable snake_case name of the variant, used in session reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RemediationError::LocalCheckFailure { .. } => "local_check_failure",
            RemediationError::DuplicateErrorDetected { .. } => "duplicate_error_detected",
            RemediationError::FixAgentTimeout(_) => "fix_agent_timeout",
            RemediationError::FixAgentUnavailable { .. } => "fix_agent_unavailable",
            RemediationError::ToolMissing { .. } => "tool_missing",
            RemediationError::CiFetchFailure(_) => "ci_fetch_failure",
            RemediationError::CiRunNotFound { .. } => "ci_run_not_found",
            RemediationError::CiRunFailed { .. } => "ci_run_failed",
            RemediationError::RetryBudgetExceeded { .. } => "retry_budget_exceeded",
            RemediationError::AutoFixBudgetExceeded { .. } => "auto_fix_budget_exceeded",
            RemediationError::Vcs(_) => "vcs",
            RemediationError::Config(_) => "config",
            RemediationError::Cancelled => "cancelled",
            RemediationError::TaskFailed(_) => "task_failed",
            RemediationError::Serialization(_) => "serialization",
            RemediationError::DigestMismatch { .. } => "digest_mismatch",
            RemediationError::Io(_) => "io",
        }
    }

    /// Guidance printed next to a terminal failure.
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            RemediationError::DuplicateErrorDetected { .. } => Some(
                "the fix agent could not change this failure; inspect it manually or roll back to a snapshot",
            ),
            RemediationError::RetryBudgetExceeded { .. } => Some(
                "CI kept failing without new commits; raise --max-retries or inspect the run manually",
            ),
            RemediationError::AutoFixBudgetExceeded { .. } => Some(
                "local checks still fail after manual escalation; raise --max-auto-fixes or fix by hand",
            ),
            RemediationError::CiRunNotFound { .. } => {
                Some("no workflow run picked up the commit; check that CI is configured for this branch")
            }
            _ => None,
        }
    }
}

impl From<toml::de::Error> for RemediationError {
    fn from(err: toml::de::Error) -> Self {
        RemediationError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for RemediationError {
    fn from(err: reqwest::Error) -> Self {
        RemediationError::CiFetchFailure(err.to_string())
    }
}

/// Result type for remediation operations.
pub type Result<T> = std::result::Result<T, RemediationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_error_display() {
        let err = RemediationError::DuplicateErrorDetected {
            fingerprint: "0123abcd".to_string(),
        };
        assert!(err.to_string().contains("0123abcd"));
        assert!(err.guidance().is_some());
        assert_eq!(err.kind(), "duplicate_error_detected");
    }

    #[test]
    fn test_only_loop_breaks_carry_guidance() {
        assert!(RemediationError::RetryBudgetExceeded { attempts: 3 }.guidance().is_some());
        assert!(RemediationError::CiFetchFailure("502".to_string()).guidance().is_none());
        assert_eq!(
            RemediationError::Vcs("push rejected".to_string()).kind(),
            "vcs"
        );
    }

    #[test]
    fn test_timeout_display_uses_seconds() {
        let err = RemediationError::FixAgentTimeout(Duration::from_secs(150));
        assert_eq!(err.to_string(), "fix agent timed out after 150s");
    }
}
