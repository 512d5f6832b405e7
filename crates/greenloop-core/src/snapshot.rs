//! Pre-fix snapshots of the working tree.
//!
//! Each snapshot is written as `NNN-<label>.json` with a `NNN-<label>.digest`
//! sidecar holding the SHA-256 of the JSON bytes. Loading re-hashes the file
//! and rejects it on mismatch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{RemediationError, Result};
use crate::vcs::VcsClient;

/// Recorded git state taken before an automated fix attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub label: String,
    /// HEAD at the time of the snapshot.
    pub sha: String,
    /// Uncommitted changes at the time of the snapshot.
    pub diff: String,
    pub timestamp: DateTime<Utc>,
}

/// Hex SHA-256 of `bytes`.
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write `value` as pretty JSON plus a `.digest` sidecar next to it.
pub fn write_with_digest<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, &json)?;
    std::fs::write(path.with_extension("digest"), content_digest(&json).as_bytes())?;
    Ok(())
}

/// Takes and persists snapshots for one session.
pub struct SnapshotManager {
    vcs: Arc<dyn VcsClient>,
    dir: PathBuf,
    counter: AtomicU32,
}

impl SnapshotManager {
    pub fn new(vcs: Arc<dyn VcsClient>, dir: impl Into<PathBuf>) -> Self {
        Self {
            vcs,
            dir: dir.into(),
            counter: AtomicU32::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record HEAD and the working-tree diff under `label`.
    pub async fn take(&self, label: &str) -> Result<PathBuf> {
        let snapshot = Snapshot {
            label: label.to_string(),
            sha: self.vcs.rev_parse("HEAD").await?,
            diff: self.vcs.diff().await?,
            timestamp: Utc::now(),
        };

        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.dir.join(format!("{seq:03}-{}.json", file_label(label)));
        write_with_digest(&snapshot, &path)?;

        info!(label, sha = %snapshot.sha, path = %path.display(), "snapshot written");
        Ok(path)
    }

    /// Read a snapshot back, verifying its digest sidecar.
    pub fn load(path: &Path) -> Result<Snapshot> {
        let json = std::fs::read(path)?;
        let expected = std::fs::read_to_string(path.with_extension("digest"))?;
        let actual = content_digest(&json);
        if expected.trim() != actual {
            return Err(RemediationError::DigestMismatch {
                expected: expected.trim().to_string(),
                actual,
            });
        }
        Ok(serde_json::from_slice(&json)?)
    }
}

fn file_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
