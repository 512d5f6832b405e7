//! Cheap/expensive fix-mode selection.
//!
//! One [`EscalationStrategy`] is owned by a session. It counts failed attempts
//! per logical task, opens a time-boxed expensive window once a task keeps
//! failing, and keeps the full attempt history for the session report.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::{FixAttempt, FixMode, FixOutcome};

/// Static complexity keywords and their weights.
const COMPLEXITY_KEYWORDS: &[(&str, u32)] = &[
    ("race condition", 3),
    ("deadlock", 3),
    ("security", 3),
    ("vulnerability", 3),
    ("architecture", 3),
    ("memory leak", 2),
    ("concurrency", 2),
    ("refactor", 2),
    ("migration", 2),
    ("flaky", 1),
    ("performance", 1),
];

/// Tunables for [`EscalationStrategy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPolicy {
    /// Failed attempts on one task before expensive mode is activated.
    pub escalation_threshold: u32,
    /// How long expensive mode stays active once activated.
    pub expensive_window: Duration,
    /// Complexity scores above this select expensive mode.
    pub complexity_threshold: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            escalation_threshold: 2,
            expensive_window: Duration::from_secs(5 * 60),
            complexity_threshold: 2,
        }
    }
}

/// Score failure text against the keyword table.
pub fn complexity_score(text: &str) -> u32 {
    let lower = text.to_lowercase();
    COMPLEXITY_KEYWORDS
        .iter()
        .filter(|(keyword, _)| lower.contains(keyword))
        .map(|(_, weight)| weight)
        .sum()
}

/// Per-session escalation state.
#[derive(Debug)]
pub struct EscalationStrategy {
    policy: EscalationPolicy,
    activated_at: Option<Instant>,
    attempts_by_task: HashMap<String, u32>,
    history: Vec<FixAttempt>,
}

impl EscalationStrategy {
    pub fn new(policy: EscalationPolicy) -> Self {
        Self {
            policy,
            activated_at: None,
            attempts_by_task: HashMap::new(),
            history: Vec::new(),
        }
    }

    /// Pick the mode for the next attempt on `task`.
    pub fn select_mode(&mut self, task: &str, context: &str, force_mode: Option<FixMode>) -> FixMode {
        if let Some(mode) = force_mode {
            debug!(task, %mode, "fix mode forced");
            return mode;
        }

        if self.expensive_window_active() {
            return FixMode::Expensive;
        }

        let attempts = self.attempts(task);
        if attempts >= self.policy.escalation_threshold {
            info!(
                task,
                attempts,
                window_secs = self.policy.expensive_window.as_secs(),
                "escalating to expensive mode"
            );
            self.activated_at = Some(Instant::now());
            return FixMode::Expensive;
        }

        let score = complexity_score(context);
        if score > self.policy.complexity_threshold {
            debug!(task, score, "complex failure, using expensive mode");
            return FixMode::Expensive;
        }

        FixMode::Cheap
    }

    /// Record the outcome of an attempt and return the stored record.
    pub fn record_attempt(
        &mut self,
        task: &str,
        mode: FixMode,
        outcome: FixOutcome,
        interactive: bool,
    ) -> &FixAttempt {
        let counter = self.attempts_by_task.entry(task.to_string()).or_insert(0);
        let attempt_number = *counter + 1;
        if outcome == FixOutcome::Success {
            *counter = 0;
        } else {
            *counter += 1;
        }

        self.history.push(FixAttempt {
            task_key: task.to_string(),
            mode,
            attempt_number,
            outcome,
            interactive,
            recorded_at: Utc::now(),
        });
        &self.history[self.history.len() - 1]
    }

    /// Failed attempts on `task` since its last success.
    pub fn attempts(&self, task: &str) -> u32 {
        self.attempts_by_task.get(task).copied().unwrap_or(0)
    }

    pub fn expensive_window_active(&self) -> bool {
        self.activated_at
            .is_some_and(|at| at.elapsed() < self.policy.expensive_window)
    }

    /// Every attempt recorded this session, oldest first.
    pub fn history(&self) -> &[FixAttempt] {
        &self.history
    }
}

impl Default for EscalationStrategy {
    fn default() -> Self {
        Self::new(EscalationPolicy::default())
    }
}
