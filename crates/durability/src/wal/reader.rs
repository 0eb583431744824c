//! Sequential WAL reader for recovery and replay.
//!
//! The reader walks segments in id order, decoding frames and skipping the
//! trailer of finalized segments. A partial frame at the tail of the last
//! (open) segment is a clean end of log; a checksum or cipher failure is
//! propagated as `corrupted` — the recovery loop, not the reader, decides
//! whether to continue.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use tokmesh_core::{Error, Result};

use crate::cipher::SegmentCipher;
use crate::format::{
    decode_frame, has_valid_trailer, list_segment_ids, segment_file_name, split_offset,
    FrameError, WalEntry, SEGMENT_MAGIC, TRAILER_LEN,
};

/// One loaded segment.
struct LoadedSegment {
    id: u32,
    bytes: Vec<u8>,
    /// End of frame data: excludes the trailer when the segment is finalized.
    data_end: usize,
    finalized: bool,
}

/// Sequential reader over all segments of a WAL directory.
pub struct WalReader {
    dir: PathBuf,
    cipher: Option<Arc<dyn SegmentCipher>>,
    /// Segment ids, ascending, fixed at open.
    segments: Vec<u32>,
    /// Index into `segments` of the segment being read.
    cursor: usize,
    current: Option<LoadedSegment>,
    /// Byte position within the current segment.
    pos: usize,
}

impl WalReader {
    /// Open a reader over every segment currently in `dir`.
    pub fn open(dir: impl Into<PathBuf>, cipher: Option<Arc<dyn SegmentCipher>>) -> Result<Self> {
        let dir = dir.into();
        let segments = list_segment_ids(&dir)?;
        Ok(WalReader {
            dir,
            cipher,
            segments,
            cursor: 0,
            current: None,
            pos: 0,
        })
    }

    /// Position the reader at a composite offset.
    ///
    /// If the offset's segment has been compacted away, reading continues
    /// from the first remaining segment with a larger id.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        let (segment_id, byte) = split_offset(offset);
        self.current = None;

        match self.segments.iter().position(|&id| id == segment_id) {
            Some(idx) => {
                self.cursor = idx;
                self.load_current()?;
                let data_end = self.current.as_ref().map(|s| s.data_end).unwrap_or(0);
                self.pos = (byte as usize).max(SEGMENT_MAGIC.len()).min(data_end);
            }
            None => {
                // First segment past the requested one.
                self.cursor = self
                    .segments
                    .iter()
                    .position(|&id| id > segment_id)
                    .unwrap_or(self.segments.len());
                self.pos = 0;
            }
        }
        Ok(())
    }

    /// Read the next entry, or `None` at the end of the log.
    pub fn read(&mut self) -> Result<Option<WalEntry>> {
        loop {
            if self.current.is_none() {
                if self.cursor >= self.segments.len() {
                    return Ok(None);
                }
                self.load_current()?;
                self.pos = SEGMENT_MAGIC.len();
            }

            let (seg_id, data_end, finalized) = {
                let segment = self.current.as_ref().unwrap();
                (segment.id, segment.data_end, segment.finalized)
            };
            if self.pos >= data_end {
                self.advance_segment();
                continue;
            }

            let decoded = {
                let segment = self.current.as_ref().unwrap();
                decode_frame(&segment.bytes[self.pos..data_end], self.cipher.as_deref())
            };
            match decoded {
                Ok((entry, consumed)) => {
                    self.pos += consumed;
                    return Ok(Some(entry));
                }
                Err(FrameError::Incomplete) => {
                    // Legitimate only at the tail of the last, open segment.
                    let at_tail = !finalized && self.cursor == self.segments.len() - 1;
                    if at_tail {
                        debug!(
                            target: "tokmesh::wal",
                            segment = seg_id,
                            offset = self.pos,
                            "partial frame at wal tail, treating as end of log"
                        );
                        self.cursor = self.segments.len();
                        self.current = None;
                        return Ok(None);
                    }
                    warn!(
                        target: "tokmesh::wal",
                        segment = seg_id,
                        offset = self.pos,
                        "incomplete frame inside segment, skipping remainder"
                    );
                    self.advance_segment();
                }
                Err(e) => {
                    return Err(Error::Corrupted(format!(
                        "segment {} offset {}: {}",
                        seg_id, self.pos, e
                    )));
                }
            }
        }
    }

    /// Collect every remaining entry.
    pub fn read_all(&mut self) -> Result<Vec<WalEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.read()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    fn advance_segment(&mut self) {
        self.cursor += 1;
        self.current = None;
    }

    fn load_current(&mut self) -> Result<()> {
        let id = self.segments[self.cursor];
        let path = self.dir.join(segment_file_name(id));
        let bytes = std::fs::read(&path)?;

        if bytes.len() < SEGMENT_MAGIC.len() || bytes[..SEGMENT_MAGIC.len()] != SEGMENT_MAGIC {
            return Err(Error::Corrupted(format!(
                "segment {} has invalid magic",
                segment_file_name(id)
            )));
        }

        let finalized = has_valid_trailer(&bytes);
        let data_end = if finalized {
            bytes.len() - TRAILER_LEN
        } else {
            bytes.len()
        };
        self.current = Some(LoadedSegment {
            id,
            bytes,
            data_end,
            finalized,
        });
        self.pos = SEGMENT_MAGIC.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::AesGcmCipher;
    use crate::wal::{WalConfig, WalWriter};
    use tokmesh_core::token::generate_token;
    use tokmesh_core::Session;

    fn entry(user: &str) -> WalEntry {
        let mut s = Session::new(user);
        let (_, hash) = generate_token();
        s.token_hash = hash;
        WalEntry::create(&s, 1)
    }

    fn write_entries(config: WalConfig, n: usize) -> Vec<WalEntry> {
        let writer = WalWriter::open(config, None).unwrap();
        let entries: Vec<WalEntry> = (0..n).map(|i| entry(&format!("user-{}", i))).collect();
        for e in &entries {
            writer.append(e).unwrap();
        }
        writer.close().unwrap();
        entries
    }

    #[test]
    fn test_empty_directory_reads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = WalReader::open(dir.path(), None).unwrap();
        assert!(reader.read().unwrap().is_none());
    }

    #[test]
    fn test_read_all_single_segment() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_entries(WalConfig::new(dir.path()), 5);

        let mut reader = WalReader::open(dir.path(), None).unwrap();
        let read = reader.read_all().unwrap();
        assert_eq!(read, written);
    }

    #[test]
    fn test_read_across_segments() {
        let dir = tempfile::tempdir().unwrap();
        let config = WalConfig::new(dir.path()).with_max_entry_count(3);
        let written = write_entries(config, 10);
        assert!(list_segment_ids(dir.path()).unwrap().len() > 1);

        let mut reader = WalReader::open(dir.path(), None).unwrap();
        assert_eq!(reader.read_all().unwrap(), written);
    }

    #[test]
    fn test_read_open_segment_without_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WalWriter::open(WalConfig::new(dir.path()), None).unwrap();
        let e = entry("u1");
        writer.append(&e).unwrap();
        std::mem::forget(writer); // no finalize

        let mut reader = WalReader::open(dir.path(), None).unwrap();
        assert_eq!(reader.read_all().unwrap(), vec![e]);
    }

    #[test]
    fn test_seek_to_offset() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WalWriter::open(WalConfig::new(dir.path()), None).unwrap();
        let first = entry("u1");
        let mid_offset = writer.append(&first).unwrap();
        let second = entry("u2");
        writer.append(&second).unwrap();
        writer.close().unwrap();

        let mut reader = WalReader::open(dir.path(), None).unwrap();
        reader.seek(mid_offset).unwrap();
        assert_eq!(reader.read_all().unwrap(), vec![second]);
    }

    #[test]
    fn test_seek_past_everything() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WalWriter::open(WalConfig::new(dir.path()), None).unwrap();
        writer.append(&entry("u1")).unwrap();
        let end = writer.current_offset();
        writer.close().unwrap();

        let mut reader = WalReader::open(dir.path(), None).unwrap();
        reader.seek(end).unwrap();
        assert!(reader.read().unwrap().is_none());
    }

    #[test]
    fn test_seek_to_compacted_segment_continues_forward() {
        let dir = tempfile::tempdir().unwrap();
        let config = WalConfig::new(dir.path()).with_max_entry_count(2);
        let written = write_entries(config, 6);

        // Remove the first segment, then seek to an offset inside it.
        std::fs::remove_file(dir.path().join(segment_file_name(1))).unwrap();
        let mut reader = WalReader::open(dir.path(), None).unwrap();
        reader.seek(crate::format::composite_offset(1, 8)).unwrap();
        let read = reader.read_all().unwrap();
        assert_eq!(read, written[2..]);
    }

    #[test]
    fn test_truncated_tail_is_clean_eof() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WalWriter::open(WalConfig::new(dir.path()), None).unwrap();
        let keep = entry("u1");
        let keep_end = writer.append(&keep).unwrap();
        writer.append(&entry("u2")).unwrap();
        std::mem::forget(writer);

        // Chop the second frame in half.
        let path = dir.path().join(segment_file_name(1));
        let bytes = std::fs::read(&path).unwrap();
        let (_, keep_bytes) = split_offset(keep_end);
        std::fs::write(&path, &bytes[..keep_bytes as usize + 3]).unwrap();

        let mut reader = WalReader::open(dir.path(), None).unwrap();
        assert_eq!(reader.read_all().unwrap(), vec![keep]);
    }

    #[test]
    fn test_bit_flip_surfaces_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WalWriter::open(WalConfig::new(dir.path()), None).unwrap();
        writer.append(&entry("u1")).unwrap();
        writer.append(&entry("u2")).unwrap();
        std::mem::forget(writer);

        let path = dir.path().join(segment_file_name(1));
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = SEGMENT_MAGIC.len() + 10;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = WalReader::open(dir.path(), None).unwrap();
        assert!(matches!(reader.read(), Err(Error::Corrupted(_))));
    }

    #[test]
    fn test_encrypted_roundtrip_through_wal() {
        let dir = tempfile::tempdir().unwrap();
        let cipher: Arc<dyn SegmentCipher> = Arc::new(AesGcmCipher::new(&[5u8; 32]));

        let writer =
            WalWriter::open(WalConfig::new(dir.path()), Some(Arc::clone(&cipher))).unwrap();
        let e = entry("u1");
        writer.append(&e).unwrap();
        writer.close().unwrap();

        let mut reader = WalReader::open(dir.path(), Some(cipher)).unwrap();
        assert_eq!(reader.read_all().unwrap(), vec![e]);

        // Without the cipher the payload is unreadable.
        let mut plain = WalReader::open(dir.path(), None).unwrap();
        assert!(plain.read().is_err());
    }
}
