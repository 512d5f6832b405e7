//! Built-in check presets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use greenloop_core::{CheckStep, RemediationConfig, RemediationError, Result};

/// Builtin verification stages for Cargo workspaces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    /// cargo fmt --all -- --check
    Fmt,

    /// cargo check --workspace --all-targets
    Check,

    /// cargo clippy --workspace --all-targets -- -D warnings
    Clippy,

    /// cargo test --workspace
    Test,
}

impl BuiltinStage {
    pub const ALL: [BuiltinStage; 4] = [
        BuiltinStage::Fmt,
        BuiltinStage::Check,
        BuiltinStage::Clippy,
        BuiltinStage::Test,
    ];

    /// Preset name as written in `greenloop.toml`.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStage::Fmt => "fmt",
            BuiltinStage::Check => "check",
            BuiltinStage::Clippy => "clippy",
            BuiltinStage::Test => "test",
        }
    }

    fn args(&self) -> &'static [&'static str] {
        match self {
            BuiltinStage::Fmt => &["fmt", "--all", "--", "--check"],
            BuiltinStage::Check => &["check", "--workspace", "--all-targets"],
            BuiltinStage::Clippy => &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
            BuiltinStage::Test => &["test", "--workspace"],
        }
    }

    /// Default timeout in seconds.
    pub fn timeout_secs(&self) -> u64 {
        match self {
            BuiltinStage::Fmt => 120,
            BuiltinStage::Check | BuiltinStage::Clippy => 600,
            BuiltinStage::Test => 1200,
        }
    }

    pub fn to_step(self) -> CheckStep {
        CheckStep::new(self.name(), "cargo", self.args().iter().copied()).with_timeout(self.timeout_secs())
    }
}

impl fmt::Display for BuiltinStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuiltinStage {
    type Err = RemediationError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase();
        let key = key.strip_prefix("cargo_").unwrap_or(&key);
        BuiltinStage::ALL
            .into_iter()
            .find(|stage| stage.name() == key)
            .ok_or_else(|| {
                RemediationError::Config(format!(
                    "unknown check preset '{s}' (expected one of: fmt, check, clippy, test)"
                ))
            })
    }
}

/// Turn preset names into steps, keeping their order.
pub fn resolve_presets<S: AsRef<str>>(names: &[S]) -> Result<Vec<CheckStep>> {
    names
        .iter()
        .map(|name| name.as_ref().parse::<BuiltinStage>().map(BuiltinStage::to_step))
        .collect()
}

/// Steps for a session: explicit `[[steps]]` win over presets.
pub fn steps_for(config: &RemediationConfig) -> Result<Vec<CheckStep>> {
    if !config.steps.is_empty() {
        return Ok(config.steps.clone());
    }
    resolve_presets(&config.presets)
}
