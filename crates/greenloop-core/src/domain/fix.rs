//! Fix-agent modes, outcomes and recorded attempts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fix-agent invocation strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FixMode {
    Cheap,
    Expensive,
}

impl fmt::Display for FixMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixMode::Cheap => write!(f, "cheap"),
            FixMode::Expensive => write!(f, "expensive"),
        }
    }
}

impl FromStr for FixMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cheap" => Ok(FixMode::Cheap),
            "expensive" => Ok(FixMode::Expensive),
            other => Err(format!("unknown fix mode '{other}' (expected cheap or expensive)")),
        }
    }
}

/// Classified outcome of one fix attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FixOutcome {
    Success,
    Failure,
    Timeout,
}

/// One recorded fix attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixAttempt {
    /// Logical task the attempt targeted (e.g. `local:lint`, `job:build`).
    pub task_key: String,
    pub mode: FixMode,
    /// 1-based attempt number for this task since its last success.
    pub attempt_number: u32,
    pub outcome: FixOutcome,
    /// Whether this was the interactive manual escalation.
    pub interactive: bool,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_mode_parse() {
        assert_eq!("cheap".parse::<FixMode>().unwrap(), FixMode::Cheap);
        assert_eq!(" Expensive ".parse::<FixMode>().unwrap(), FixMode::Expensive);
        assert!("medium".parse::<FixMode>().is_err());
    }

    #[test]
    fn test_fix_outcome_serde() {
        let json = serde_json::to_string(&FixOutcome::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
    }
}
