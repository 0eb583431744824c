//! WAL compaction.
//!
//! Removes finalized segments that a snapshot has made redundant: a segment
//! is deletable once its id is strictly below the snapshot offset's segment
//! and it is outside the retention floor of most-recent segments. The
//! active segment is never finalized, so it is never deleted.

use std::path::PathBuf;
use tracing::{debug, info, warn};

use tokmesh_core::Result;

use crate::format::{is_finalized_segment, list_segment_ids, segment_file_name, split_offset};

/// Default number of most-recent segments kept regardless of coverage.
pub const DEFAULT_RETAIN_COUNT: usize = 3;

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Default)]
pub struct CompactInfo {
    /// Segment ids removed.
    pub removed_segments: Vec<u32>,
    /// Bytes reclaimed.
    pub reclaimed_bytes: u64,
}

/// Deletes WAL segments fully covered by a snapshot.
pub struct WalCompactor {
    dir: PathBuf,
    retain_count: usize,
}

impl WalCompactor {
    /// Compactor over `dir`, keeping at least `retain_count` recent segments.
    pub fn new(dir: impl Into<PathBuf>, retain_count: usize) -> Self {
        WalCompactor {
            dir: dir.into(),
            retain_count,
        }
    }

    /// Remove finalized segments with id below the snapshot's segment,
    /// except the `retain_count` most recent ones.
    pub fn compact(&self, snapshot_wal_offset: u64) -> Result<CompactInfo> {
        let (covered_below, _) = split_offset(snapshot_wal_offset);
        let ids = list_segment_ids(&self.dir)?;
        let mut info = CompactInfo::default();

        let protected_from = ids.len().saturating_sub(self.retain_count);
        for (idx, &id) in ids.iter().enumerate() {
            if idx >= protected_from || id >= covered_below {
                continue;
            }
            let path = self.dir.join(segment_file_name(id));
            match is_finalized_segment(&path) {
                Ok(true) => {
                    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                    match std::fs::remove_file(&path) {
                        Ok(()) => {
                            debug!(target: "tokmesh::compaction", segment = id, size, "removed wal segment");
                            info.removed_segments.push(id);
                            info.reclaimed_bytes += size;
                        }
                        Err(e) => {
                            warn!(target: "tokmesh::compaction", segment = id, error = %e, "failed to remove segment")
                        }
                    }
                }
                Ok(false) => {
                    debug!(target: "tokmesh::compaction", segment = id, "skipping open segment")
                }
                Err(e) => {
                    warn!(target: "tokmesh::compaction", segment = id, error = %e, "failed to inspect segment")
                }
            }
        }

        if !info.removed_segments.is_empty() {
            info!(
                target: "tokmesh::compaction",
                removed = info.removed_segments.len(),
                reclaimed_bytes = info.reclaimed_bytes,
                "wal compaction complete"
            );
        }
        Ok(info)
    }

    /// Remove every WAL segment file.
    pub fn clean_all(&self) -> Result<usize> {
        let ids = list_segment_ids(&self.dir)?;
        let mut removed = 0;
        for id in &ids {
            std::fs::remove_file(self.dir.join(segment_file_name(*id)))?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Number of segment files. A missing directory counts as zero.
    pub fn file_count(&self) -> usize {
        list_segment_ids(&self.dir).map(|ids| ids.len()).unwrap_or(0)
    }

    /// Total bytes across segment files. A missing directory counts as zero.
    pub fn total_size(&self) -> u64 {
        let ids = match list_segment_ids(&self.dir) {
            Ok(ids) => ids,
            Err(_) => return 0,
        };
        ids.iter()
            .filter_map(|id| std::fs::metadata(self.dir.join(segment_file_name(*id))).ok())
            .map(|m| m.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::composite_offset;
    use crate::wal::{WalConfig, WalWriter};
    use tokmesh_core::token::generate_token;
    use tokmesh_core::Session;

    fn fill_segments(dir: &std::path::Path, segments: u32) {
        // One entry per segment via a tiny entry-count bound.
        let config = WalConfig::new(dir).with_max_entry_count(1);
        let writer = WalWriter::open(config, None).unwrap();
        for i in 0..segments {
            let mut s = Session::new(format!("user-{}", i));
            let (_, hash) = generate_token();
            s.token_hash = hash;
            writer
                .append(&crate::format::WalEntry::create(&s, 1))
                .unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn test_compact_respects_retention_floor() {
        let dir = tempfile::tempdir().unwrap();
        fill_segments(dir.path(), 6);
        let compactor = WalCompactor::new(dir.path(), 3);

        // Snapshot covers everything, but the 3 newest segments stay.
        let info = compactor
            .compact(composite_offset(u32::MAX, 0))
            .unwrap();
        let remaining = list_segment_ids(dir.path()).unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(!info.removed_segments.is_empty());
        assert!(info.reclaimed_bytes > 0);
    }

    #[test]
    fn test_compact_only_covered_segments() {
        let dir = tempfile::tempdir().unwrap();
        fill_segments(dir.path(), 8);
        let compactor = WalCompactor::new(dir.path(), 1);

        // Snapshot sits in segment 3: only 1 and 2 are covered.
        compactor.compact(composite_offset(3, 0)).unwrap();
        let remaining = list_segment_ids(dir.path()).unwrap();
        assert!(!remaining.contains(&1));
        assert!(!remaining.contains(&2));
        assert!(remaining.contains(&3));
    }

    #[test]
    fn test_compact_nothing_to_do() {
        let dir = tempfile::tempdir().unwrap();
        fill_segments(dir.path(), 2);
        let compactor = WalCompactor::new(dir.path(), 3);
        let info = compactor.compact(composite_offset(5, 0)).unwrap();
        assert!(info.removed_segments.is_empty());
        assert_eq!(compactor.file_count(), list_segment_ids(dir.path()).unwrap().len());
    }

    #[test]
    fn test_clean_all() {
        let dir = tempfile::tempdir().unwrap();
        fill_segments(dir.path(), 4);
        let compactor = WalCompactor::new(dir.path(), 3);
        let removed = compactor.clean_all().unwrap();
        assert!(removed >= 4);
        assert_eq!(compactor.file_count(), 0);
        assert_eq!(compactor.total_size(), 0);
    }

    #[test]
    fn test_missing_directory_counts_zero() {
        let dir = tempfile::tempdir().unwrap();
        let compactor = WalCompactor::new(dir.path().join("absent"), 3);
        assert_eq!(compactor.file_count(), 0);
        assert_eq!(compactor.total_size(), 0);
        assert!(compactor.compact(composite_offset(10, 0)).unwrap().removed_segments.is_empty());
    }
}
