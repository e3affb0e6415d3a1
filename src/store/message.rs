//! Durable, append-only mapping of outbound sequence number to raw encoded
//! bytes (`OutboundLog`), sufficient to answer a Resend Request.
//!
//! Persisted as `messages_<sender>.json`, one JSON record per line (the
//! external interface's persisted-state layout is informative, not
//! normative, on encoding — an append-only log keeps the store crash-safe
//! without needing whole-file rewrite+rename on every send). The in-memory
//! `seq -> byte offset` index is rebuilt by scanning the log on first touch
//! per session, rather than trusting a sidecar index file that could have
//! fallen out of sync with the log across a crash.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Policy for when appends are flushed to durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityPolicy {
    /// `fsync` after every append (required on the session's critical
    /// send path, per §4.3's ordering rule).
    Always,
    /// `fsync` only once at least this many milliseconds have elapsed
    /// since the last sync.
    IntervalMs(u64),
    /// Never explicitly sync.
    Disabled,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub base_dir: PathBuf,
    pub durability: DurabilityPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { base_dir: PathBuf::from("."), durability: DurabilityPolicy::Always }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    seq: u32,
    raw_b64: String,
}

#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    async fn append_outbound(&self, file_key: &str, seq: u32, raw: &[u8]) -> std::io::Result<()>;
    async fn load_range(&self, file_key: &str, begin: u32, end: u32) -> std::io::Result<Vec<(u32, Bytes)>>;
    async fn last_outbound_seq(&self, file_key: &str) -> std::io::Result<Option<u32>>;
}

struct IndexEntry {
    offsets: BTreeMap<u32, u64>,
    last_sync: tokio::time::Instant,
}

/// File-based [`MessageStore`]: one append-only `.json` log per session,
/// with an in-memory index rebuilt on first access.
pub struct FileMessageStore {
    cfg: StorageConfig,
    indices: Mutex<HashMap<String, IndexEntry>>,
}

impl FileMessageStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(StorageConfig { base_dir: base_dir.into(), ..StorageConfig::default() })
    }

    pub fn with_config(cfg: StorageConfig) -> Self {
        Self { cfg, indices: Mutex::new(HashMap::new()) }
    }

    fn data_path(&self, file_key: &str) -> PathBuf {
        self.cfg.base_dir.join(format!("messages_{file_key}.json"))
    }

    async fn rebuild_index(&self, file_key: &str) -> std::io::Result<BTreeMap<u32, u64>> {
        let path = self.data_path(file_key);
        let mut offsets = BTreeMap::new();
        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(offsets),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut offset: u64 = 0;
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                break;
            }
            if let Ok(rec) = serde_json::from_str::<StoredRecord>(line.trim_end()) {
                offsets.insert(rec.seq, offset);
            }
            offset += n as u64;
        }
        Ok(offsets)
    }

    async fn ensure_indexed(&self, file_key: &str) -> std::io::Result<()> {
        let mut indices = self.indices.lock().await;
        if !indices.contains_key(file_key) {
            let offsets = self.rebuild_index(file_key).await?;
            indices.insert(
                file_key.to_string(),
                IndexEntry { offsets, last_sync: tokio::time::Instant::now() },
            );
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn append_outbound(&self, file_key: &str, seq: u32, raw: &[u8]) -> std::io::Result<()> {
        self.ensure_indexed(file_key).await?;
        fs::create_dir_all(&self.cfg.base_dir).await?;
        let path = self.data_path(file_key);

        let offset = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);

        let record = StoredRecord { seq, raw_b64: general_purpose::STANDARD.encode(raw) };
        let mut line = serde_json::to_vec(&record).expect("StoredRecord always serializes");
        line.push(b'\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(&line).await?;

        let mut indices = self.indices.lock().await;
        let entry = indices.get_mut(file_key).expect("ensure_indexed populated this key");
        match self.cfg.durability {
            DurabilityPolicy::Always => {
                file.sync_data().await?;
                entry.last_sync = tokio::time::Instant::now();
            }
            DurabilityPolicy::IntervalMs(ms) => {
                if entry.last_sync.elapsed() >= tokio::time::Duration::from_millis(ms) {
                    file.sync_data().await?;
                    entry.last_sync = tokio::time::Instant::now();
                }
            }
            DurabilityPolicy::Disabled => {}
        }
        entry.offsets.insert(seq, offset);
        Ok(())
    }

    async fn load_range(&self, file_key: &str, begin: u32, end: u32) -> std::io::Result<Vec<(u32, Bytes)>> {
        self.ensure_indexed(file_key).await?;
        let offsets: Vec<(u32, u64)> = {
            let indices = self.indices.lock().await;
            indices
                .get(file_key)
                .map(|entry| {
                    entry
                        .offsets
                        .range(begin..=end)
                        .map(|(&s, &o)| (s, o))
                        .collect()
                })
                .unwrap_or_default()
        };
        if offsets.is_empty() {
            return Ok(Vec::new());
        }

        let path = self.data_path(file_key);
        let mut file = File::open(&path).await?;
        let mut out = Vec::with_capacity(offsets.len());
        for (seq, offset) in offsets {
            use tokio::io::AsyncSeekExt;
            file.seek(std::io::SeekFrom::Start(offset)).await?;
            let mut reader = BufReader::new(&mut file);
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            let rec: StoredRecord = serde_json::from_str(line.trim_end())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            let raw = general_purpose::STANDARD
                .decode(&rec.raw_b64)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            out.push((seq, Bytes::from(raw)));
        }
        Ok(out)
    }

    async fn last_outbound_seq(&self, file_key: &str) -> std::io::Result<Option<u32>> {
        self.ensure_indexed(file_key).await?;
        let indices = self.indices.lock().await;
        Ok(indices.get(file_key).and_then(|e| e.offsets.keys().next_back().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_and_loads_a_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMessageStore::new(dir.path());

        store.append_outbound("CLIENT1", 5, b"app-5").await.unwrap();
        store.append_outbound("CLIENT1", 6, b"hb-6").await.unwrap();
        store.append_outbound("CLIENT1", 7, b"app-7").await.unwrap();

        let range = store.load_range("CLIENT1", 5, 7).await.unwrap();
        assert_eq!(range.len(), 3);
        assert_eq!(range[0], (5, Bytes::from_static(b"app-5")));
        assert_eq!(range[2], (7, Bytes::from_static(b"app-7")));

        assert_eq!(store.last_outbound_seq("CLIENT1").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn rebuilds_index_from_existing_log_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileMessageStore::new(dir.path());
            store.append_outbound("CLIENT1", 1, b"one").await.unwrap();
            store.append_outbound("CLIENT1", 2, b"two").await.unwrap();
        }
        let store = FileMessageStore::new(dir.path());
        assert_eq!(store.last_outbound_seq("CLIENT1").await.unwrap(), Some(2));
        let range = store.load_range("CLIENT1", 1, 2).await.unwrap();
        assert_eq!(range.len(), 2);
    }

    #[tokio::test]
    async fn missing_range_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMessageStore::new(dir.path());
        let range = store.load_range("NOBODY", 1, 10).await.unwrap();
        assert!(range.is_empty());
    }
}
