//! WAL writer configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Durability mode for acknowledged writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Every append is flushed and fsynced before it returns.
    #[default]
    Sync,
    /// Appends buffer; a background ticker fsyncs every `sync_interval`.
    /// A crash can lose up to one interval of trailing writes.
    Batch,
}

/// WAL configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory holding `wal-*.log` segments.
    pub dir: PathBuf,
    /// Durability mode.
    pub sync_mode: SyncMode,
    /// Fsync cadence in `Batch` mode.
    pub sync_interval: Duration,
    /// Flush once this many entries are buffered.
    pub batch_count: usize,
    /// Flush once this many bytes are buffered.
    pub batch_bytes: usize,
    /// Rotate the segment before its logical size would exceed this.
    pub max_file_size: u64,
    /// Rotate the segment before it would hold more entries than this.
    pub max_entry_count: u64,
}

impl WalConfig {
    /// Configuration with defaults for the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        WalConfig {
            dir: dir.into(),
            sync_mode: SyncMode::Sync,
            sync_interval: Duration::from_secs(1),
            batch_count: 100,
            batch_bytes: 1024 * 1024,
            max_file_size: 64 * 1024 * 1024,
            max_entry_count: 100_000,
        }
    }

    /// Set the durability mode.
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Set the batch-mode fsync cadence.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Set the buffered-entry flush threshold.
    pub fn with_batch_count(mut self, count: usize) -> Self {
        self.batch_count = count;
        self
    }

    /// Set the buffered-byte flush threshold.
    pub fn with_batch_bytes(mut self, bytes: usize) -> Self {
        self.batch_bytes = bytes;
        self
    }

    /// Set the segment size rotation bound.
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Set the segment entry-count rotation bound.
    pub fn with_max_entry_count(mut self, count: u64) -> Self {
        self.max_entry_count = count;
        self
    }

    /// Small limits suitable for tests that exercise rotation.
    pub fn for_testing(dir: impl Into<PathBuf>) -> Self {
        WalConfig::new(dir)
            .with_sync_interval(Duration::from_millis(20))
            .with_batch_count(4)
            .with_batch_bytes(16 * 1024)
            .with_max_file_size(64 * 1024)
            .with_max_entry_count(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = WalConfig::new("/tmp/wal");
        assert_eq!(cfg.sync_mode, SyncMode::Sync);
        assert_eq!(cfg.sync_interval, Duration::from_secs(1));
        assert_eq!(cfg.batch_count, 100);
        assert_eq!(cfg.batch_bytes, 1024 * 1024);
        assert_eq!(cfg.max_file_size, 64 * 1024 * 1024);
        assert_eq!(cfg.max_entry_count, 100_000);
    }

    #[test]
    fn test_builder() {
        let cfg = WalConfig::new("/tmp/wal")
            .with_sync_mode(SyncMode::Batch)
            .with_batch_count(7)
            .with_max_file_size(123);
        assert_eq!(cfg.sync_mode, SyncMode::Batch);
        assert_eq!(cfg.batch_count, 7);
        assert_eq!(cfg.max_file_size, 123);
    }
}
