//! Durable `(next_outbound, next_expected_inbound)` pair, persisted as
//! `session_<sender>.json` under the configured store directory.
//!
//! Every write goes to a sibling temp file, `fsync`'d, then renamed over the
//! target — a POSIX atomic rename on the same filesystem — so a crash never
//! leaves a half-written counter file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// The two counters a session must never lose: the next sequence number it
/// will assign to an outbound message, and the next one it expects inbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    #[serde(rename = "out")]
    pub next_outbound: u32,
    #[serde(rename = "in")]
    pub next_expected_inbound: u32,
}

impl Default for SequenceState {
    fn default() -> Self {
        Self { next_outbound: 1, next_expected_inbound: 1 }
    }
}

pub struct SequenceStore {
    path: PathBuf,
}

impl SequenceStore {
    pub fn new(store_dir: &Path, file_key: &str) -> Self {
        Self { path: store_dir.join(format!("session_{file_key}.json")) }
    }

    /// Load the persisted pair, or [`SequenceState::default`] (both
    /// counters at 1) if no state file exists yet.
    pub async fn load(&self) -> std::io::Result<SequenceState> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SequenceState::default()),
            Err(e) => Err(e),
        }
    }

    /// Atomically persist `state`. Must complete before the corresponding
    /// send/accept is observable on the wire (§7, Store I/O: fail-stop).
    pub async fn persist(&self, state: &SequenceState) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec(state)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut tmp = File::create(&tmp_path).await?;
        tmp.write_all(&body).await?;
        tmp.sync_all().await?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path).await
    }
}
