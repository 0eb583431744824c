//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokmesh_core::limits::DEFAULT_MAX_SESSIONS_PER_USER;
use tokmesh_durability::wal::SyncMode;

/// Configuration for [`crate::SessionEngine`].
///
/// The WAL lives in `<data_dir>/wal`, snapshots in `<data_dir>/snapshots`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root data directory.
    pub data_dir: PathBuf,
    /// Node identity recorded in snapshot headers.
    pub node_id: String,

    /// WAL durability mode.
    pub sync_mode: SyncMode,
    /// Batch-mode fsync cadence.
    pub sync_interval: Duration,
    /// WAL buffered-entry flush threshold.
    pub batch_count: usize,
    /// WAL buffered-byte flush threshold.
    pub batch_bytes: usize,
    /// WAL segment size rotation bound.
    pub max_file_size: u64,
    /// WAL segment entry-count rotation bound.
    pub max_entry_count: u64,
    /// Segments kept by compaction regardless of snapshot coverage.
    pub wal_retain_count: usize,

    /// Cadence of the periodic snapshot task.
    pub snapshot_interval: Duration,
    /// Snapshots kept by count.
    pub snapshot_retention_count: usize,
    /// Snapshots kept by age.
    pub snapshot_retention_days: u32,

    /// Store shard count (rounded up to a power of two).
    pub shard_count: usize,
    /// Per-user live session cap.
    pub max_sessions_per_user: usize,
    /// Cadence of the expired-session sweep.
    pub expiry_sweep_interval: Duration,

    /// Encryption-at-rest key for WAL frames and snapshot bodies.
    pub cipher_key: Option<[u8; 32]>,
}

impl EngineConfig {
    /// Defaults rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        EngineConfig {
            data_dir: data_dir.into(),
            node_id: "tokmesh-node".to_string(),
            sync_mode: SyncMode::Sync,
            sync_interval: Duration::from_secs(1),
            batch_count: 100,
            batch_bytes: 1024 * 1024,
            max_file_size: 64 * 1024 * 1024,
            max_entry_count: 100_000,
            wal_retain_count: 3,
            snapshot_interval: Duration::from_secs(60 * 60),
            snapshot_retention_count: 5,
            snapshot_retention_days: 7,
            shard_count: 16,
            max_sessions_per_user: DEFAULT_MAX_SESSIONS_PER_USER,
            expiry_sweep_interval: Duration::from_secs(60),
            cipher_key: None,
        }
    }

    /// Set the node id.
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Set the WAL durability mode.
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Set the snapshot cadence.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Set the per-user session cap.
    pub fn with_max_sessions_per_user(mut self, max: usize) -> Self {
        self.max_sessions_per_user = max;
        self
    }

    /// Set the encryption key.
    pub fn with_cipher_key(mut self, key: [u8; 32]) -> Self {
        self.cipher_key = Some(key);
        self
    }

    /// Long background intervals and small segments, for tests.
    pub fn for_testing(data_dir: impl Into<PathBuf>) -> Self {
        let mut cfg = EngineConfig::new(data_dir);
        cfg.snapshot_interval = Duration::from_secs(3600);
        cfg.expiry_sweep_interval = Duration::from_secs(3600);
        cfg.max_file_size = 64 * 1024;
        cfg
    }

    /// WAL directory under the data root.
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    /// Snapshot directory under the data root.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    pub(crate) fn wal_config(&self) -> tokmesh_durability::wal::WalConfig {
        tokmesh_durability::wal::WalConfig::new(self.wal_dir())
            .with_sync_mode(self.sync_mode)
            .with_sync_interval(self.sync_interval)
            .with_batch_count(self.batch_count)
            .with_batch_bytes(self.batch_bytes)
            .with_max_file_size(self.max_file_size)
            .with_max_entry_count(self.max_entry_count)
    }

    pub(crate) fn snapshot_config(
        &self,
        cipher: Option<std::sync::Arc<dyn tokmesh_durability::SegmentCipher>>,
    ) -> tokmesh_durability::SnapshotConfig {
        let mut cfg = tokmesh_durability::SnapshotConfig::new(self.snapshot_dir(), &self.node_id)
            .with_retention_count(self.snapshot_retention_count)
            .with_retention_days(self.snapshot_retention_days);
        if let Some(cipher) = cipher {
            cfg = cfg.with_cipher(cipher);
        }
        cfg
    }
}

impl AsRef<Path> for EngineConfig {
    fn as_ref(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::new("/tmp/tokmesh");
        assert_eq!(cfg.sync_mode, SyncMode::Sync);
        assert_eq!(cfg.snapshot_interval, Duration::from_secs(3600));
        assert_eq!(cfg.snapshot_retention_count, 5);
        assert_eq!(cfg.snapshot_retention_days, 7);
        assert_eq!(cfg.wal_retain_count, 3);
        assert_eq!(cfg.max_sessions_per_user, 50);
        assert_eq!(cfg.wal_dir(), PathBuf::from("/tmp/tokmesh/wal"));
        assert_eq!(cfg.snapshot_dir(), PathBuf::from("/tmp/tokmesh/snapshots"));
    }

    #[test]
    fn test_builder() {
        let cfg = EngineConfig::new("/data")
            .with_node_id("n1")
            .with_max_sessions_per_user(3)
            .with_cipher_key([1; 32]);
        assert_eq!(cfg.node_id, "n1");
        assert_eq!(cfg.max_sessions_per_user, 3);
        assert!(cfg.cipher_key.is_some());
    }
}
