//! Stage, commit and push remediation changes.
//!
//! Staging and committing are one logical step: when the commit fails after
//! the index was touched, the index is reset so the tree is never left
//! half-staged. A failed push never undoes the commit; the caller sees
//! `pushed == false` and can retry with [`ChangeCommitter::push_pending`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::dispatcher::{DispatchKind, FixDispatcher};
use crate::domain::{FixMode, FixOutcome};
use crate::error::Result;
use crate::prompts;
use crate::vcs::VcsClient;

/// Used when no message is supplied and generation fails.
pub const FALLBACK_COMMIT_MESSAGE: &str = "fix: automated remediation of failing checks";

/// Longest generated subject line accepted.
const MAX_SUBJECT_LEN: usize = 72;

/// External commit message generation.
#[async_trait]
pub trait MessageGenerator: Send + Sync {
    /// Produce a one-line message for `diff`, or `None` if generation failed.
    async fn generate(&self, diff: &str) -> Option<String>;
}

/// Options for [`ChangeCommitter::commit_and_maybe_push`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Skip pre-commit hooks.
    pub no_verify: bool,
    /// Push after committing.
    pub push: bool,
}

/// Result of a commit attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub committed: bool,
    pub sha: Option<String>,
    pub pushed: bool,
}

/// Commits working-tree changes produced by the fix agent.
#[derive(Clone)]
pub struct ChangeCommitter {
    vcs: Arc<dyn VcsClient>,
    generator: Option<Arc<dyn MessageGenerator>>,
}

impl ChangeCommitter {
    pub fn new(vcs: Arc<dyn VcsClient>) -> Self {
        Self {
            vcs,
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn MessageGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Commit all changes, optionally pushing. No-op on a clean tree.
    ///
    /// Push errors are logged rather than returned: the commit exists and the
    /// outcome reports it as unpushed.
    pub async fn commit_and_maybe_push(
        &self,
        message: Option<&str>,
        options: CommitOptions,
    ) -> Result<CommitOutcome> {
        if !self.vcs.is_dirty().await? {
            info!("working tree clean, nothing to commit");
            return Ok(CommitOutcome::default());
        }

        let message = match message {
            Some(m) if !m.trim().is_empty() => m.trim().to_string(),
            _ => self.generate_message().await,
        };

        self.vcs.add(&[".".to_string()]).await?;
        if let Err(err) = self.vcs.commit(&message, options.no_verify).await {
            warn!(error = %err, "commit failed, unstaging changes");
            if let Err(reset_err) = self.vcs.reset_staged().await {
                warn!(error = %reset_err, "failed to unstage after commit failure");
            }
            return Err(err);
        }

        let sha = self.vcs.rev_parse("HEAD").await?;
        info!(sha = %sha, message = %message, "committed remediation changes");

        let pushed = if options.push {
            match self.vcs.push().await {
                Ok(()) => {
                    info!(sha = %sha, "pushed");
                    true
                }
                Err(err) => {
                    warn!(sha = %sha, error = %err, "push failed, commit kept locally");
                    false
                }
            }
        } else {
            false
        };

        Ok(CommitOutcome {
            committed: true,
            sha: Some(sha),
            pushed,
        })
    }

    /// Push commits that were created earlier without pushing.
    pub async fn push_pending(&self) -> Result<String> {
        self.vcs.push().await?;
        let sha = self.vcs.rev_parse("HEAD").await?;
        info!(sha = %sha, "pushed pending commits");
        Ok(sha)
    }

    async fn generate_message(&self) -> String {
        let Some(generator) = &self.generator else {
            return FALLBACK_COMMIT_MESSAGE.to_string();
        };

        let diff = match self.vcs.diff().await {
            Ok(diff) => diff,
            Err(err) => {
                warn!(error = %err, "could not read diff for commit message");
                return FALLBACK_COMMIT_MESSAGE.to_string();
            }
        };

        generator
            .generate(&diff)
            .await
            .and_then(|raw| sanitize_subject(&raw))
            .unwrap_or_else(|| FALLBACK_COMMIT_MESSAGE.to_string())
    }
}

/// Generates commit messages with the fix agent in cheap mode.
pub struct AgentMessageGenerator {
    dispatcher: FixDispatcher,
}

impl AgentMessageGenerator {
    pub fn new(dispatcher: FixDispatcher) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl MessageGenerator for AgentMessageGenerator {
    async fn generate(&self, diff: &str) -> Option<String> {
        let prompt = prompts::commit_message(diff);
        let outcome = self
            .dispatcher
            .dispatch(&prompt, FixMode::Cheap, DispatchKind::Batch)
            .await;
        if outcome.outcome() != FixOutcome::Success {
            return None;
        }
        Some(outcome.stdout)
    }
}

/// First non-empty line, stripped of quotes and fences, bounded in length.
pub fn sanitize_subject(raw: &str) -> Option<String> {
    let line = raw
        .lines()
        .map(|l| l.trim().trim_matches(|c| c == '`' || c == '"' || c == '\''))
        .find(|l| !l.trim().is_empty())?
        .trim();

    let subject: String = line.chars().take(MAX_SUBJECT_LEN).collect();
    Some(subject)
}
