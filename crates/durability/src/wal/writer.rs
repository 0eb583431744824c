//! Append-only segmented WAL writer.
//!
//! One mutex guards the buffer, file handle, running hash, and close flag;
//! appends are strictly serialized, so recovered order equals acknowledged
//! order. The writer keeps a running SHA-256 over everything written to the
//! current segment, which makes finalization O(1): the digest is appended
//! as the 32-byte trailer.
//!
//! # Startup
//!
//! The directory is scanned for `wal-*.log`. If the newest segment carries
//! a valid trailer it is immutable and a fresh segment opens at `id + 1`;
//! otherwise the open segment is resumed: magic validated, frames walked to
//! the last intact boundary (a partial tail is truncated away), and the
//! running hash recomputed over the surviving bytes.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

use tokmesh_core::{Error, Result};

use crate::cipher::SegmentCipher;
use crate::format::{
    composite_offset, encode_frame, frame_len, has_valid_trailer, list_segment_ids,
    segment_file_name, FrameError, WalEntry, SEGMENT_MAGIC,
};
use crate::fsutil::{create_dir_secure, create_file_secure};

use super::config::{SyncMode, WalConfig};

struct Inner {
    file: File,
    segment_id: u32,
    /// Bytes durably in the file, excluding any trailer.
    written_size: u64,
    /// Entries durably in the file.
    written_entries: u64,
    /// Framed bytes not yet written to the file.
    pending: Vec<u8>,
    pending_entries: u64,
    /// Running digest over written bytes; trailer source at finalize.
    hasher: Sha256,
    closed: bool,
}

/// Segmented append-only WAL writer.
pub struct WalWriter {
    inner: Arc<Mutex<Inner>>,
    config: WalConfig,
    cipher: Option<Arc<dyn SegmentCipher>>,
    ticker: Mutex<Option<(mpsc::Sender<()>, JoinHandle<()>)>>,
}

impl WalWriter {
    /// Open the WAL in `config.dir`, resuming or rotating as needed.
    pub fn open(config: WalConfig, cipher: Option<Arc<dyn SegmentCipher>>) -> Result<Self> {
        create_dir_secure(&config.dir)?;

        let ids = list_segment_ids(&config.dir)?;
        let inner = match ids.last() {
            None => Self::start_segment(&config.dir, 1)?,
            Some(&last) => {
                let path = config.dir.join(segment_file_name(last));
                let bytes = std::fs::read(&path)?;
                if has_valid_trailer(&bytes) {
                    Self::start_segment(&config.dir, last + 1)?
                } else {
                    Self::resume_segment(&config.dir, last, bytes)?
                }
            }
        };

        let writer = WalWriter {
            inner: Arc::new(Mutex::new(inner)),
            config,
            cipher,
            ticker: Mutex::new(None),
        };
        if writer.config.sync_mode == SyncMode::Batch {
            writer.spawn_ticker();
        }
        Ok(writer)
    }

    fn start_segment(dir: &PathBuf, id: u32) -> Result<Inner> {
        let path = dir.join(segment_file_name(id));
        let mut file = create_file_secure(&path)?;
        file.write_all(&SEGMENT_MAGIC)?;
        let mut hasher = Sha256::new();
        hasher.update(SEGMENT_MAGIC);
        debug!(target: "tokmesh::wal", segment = id, "opened new wal segment");
        Ok(Inner {
            file,
            segment_id: id,
            written_size: SEGMENT_MAGIC.len() as u64,
            written_entries: 0,
            pending: Vec::new(),
            pending_entries: 0,
            hasher,
            closed: false,
        })
    }

    fn resume_segment(dir: &PathBuf, id: u32, bytes: Vec<u8>) -> Result<Inner> {
        if bytes.len() < SEGMENT_MAGIC.len() || bytes[..SEGMENT_MAGIC.len()] != SEGMENT_MAGIC {
            return Err(Error::Corrupted(format!(
                "segment {} has invalid magic",
                segment_file_name(id)
            )));
        }

        // Walk frames to the last intact boundary. CRCs are verified without
        // the cipher; integrity covers the on-disk payload form.
        let mut valid_end = SEGMENT_MAGIC.len();
        let mut entries = 0u64;
        loop {
            match frame_len(&bytes[valid_end..]) {
                Ok(n) => {
                    valid_end += n;
                    entries += 1;
                }
                Err(FrameError::Incomplete) => break,
                Err(e) => {
                    warn!(
                        target: "tokmesh::wal",
                        segment = id,
                        offset = valid_end,
                        error = %e,
                        "dropping invalid tail while resuming segment"
                    );
                    break;
                }
            }
        }

        let path = dir.join(segment_file_name(id));
        let mut file = std::fs::OpenOptions::new().read(true).write(true).open(&path)?;
        if valid_end < bytes.len() {
            warn!(
                target: "tokmesh::wal",
                segment = id,
                truncated = bytes.len() - valid_end,
                "truncating partial wal tail"
            );
            file.set_len(valid_end as u64)?;
        }
        file.seek(SeekFrom::Start(valid_end as u64))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes[..valid_end]);
        debug!(target: "tokmesh::wal", segment = id, size = valid_end, entries, "resumed wal segment");
        Ok(Inner {
            file,
            segment_id: id,
            written_size: valid_end as u64,
            written_entries: entries,
            pending: Vec::new(),
            pending_entries: 0,
            hasher,
            closed: false,
        })
    }

    fn spawn_ticker(&self) {
        let (tx, rx) = mpsc::channel::<()>();
        let inner = Arc::clone(&self.inner);
        let interval = self.config.sync_interval;
        let config = self.config.clone();
        let handle = std::thread::Builder::new()
            .name("tokmesh-wal-sync".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        let mut inner = inner.lock();
                        if inner.closed {
                            break;
                        }
                        if let Err(e) = Self::flush_locked(&mut inner, &config, true) {
                            warn!(target: "tokmesh::wal", error = %e, "background wal sync failed");
                        }
                    }
                    // Stop signal or writer dropped.
                    _ => break,
                }
            })
            .expect("spawn wal sync thread");
        *self.ticker.lock() = Some((tx, handle));
    }

    /// Append one entry.
    ///
    /// Returns the composite offset just past the appended frame. In `Sync`
    /// mode the entry is durable when this returns; in `Batch` mode it is
    /// buffered and fsynced within `sync_interval` or on close.
    pub fn append(&self, entry: &WalEntry) -> Result<u64> {
        entry.validate()?;
        let frame = encode_frame(entry, self.cipher.as_deref())
            .map_err(|e| Error::Serialization(e.to_string()))?;

        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::WriterClosed);
        }

        inner.pending.extend_from_slice(&frame);
        inner.pending_entries += 1;

        match self.config.sync_mode {
            SyncMode::Sync => Self::flush_locked(&mut inner, &self.config, true)?,
            SyncMode::Batch => {
                if inner.pending_entries as usize >= self.config.batch_count
                    || inner.pending.len() >= self.config.batch_bytes
                {
                    Self::flush_locked(&mut inner, &self.config, false)?;
                }
            }
        }

        Ok(Self::offset_locked(&inner))
    }

    /// Flush buffered frames to the file, optionally fsyncing.
    pub fn flush(&self, fsync: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::WriterClosed);
        }
        Self::flush_locked(&mut inner, &self.config, fsync)
    }

    /// Composite offset of the write position: `(segment << 32) | bytes`,
    /// counting buffered bytes and never any trailer.
    pub fn current_offset(&self) -> u64 {
        Self::offset_locked(&self.inner.lock())
    }

    /// Current segment id.
    pub fn current_segment(&self) -> u32 {
        self.inner.lock().segment_id
    }

    /// Stop the ticker, flush the remaining buffer, and finalize the
    /// segment. Further appends fail with `writer_closed`.
    pub fn close(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Ok(());
            }
            inner.closed = true;
        }

        if let Some((tx, handle)) = self.ticker.lock().take() {
            drop(tx);
            let _ = handle.join();
        }

        let mut inner = self.inner.lock();
        Self::flush_locked(&mut inner, &self.config, true)?;
        Self::finalize_locked(&mut inner)?;
        Ok(())
    }

    fn offset_locked(inner: &Inner) -> u64 {
        composite_offset(
            inner.segment_id,
            (inner.written_size + inner.pending.len() as u64) as u32,
        )
    }

    fn flush_locked(inner: &mut Inner, config: &WalConfig, fsync: bool) -> Result<()> {
        if !inner.pending.is_empty() {
            let over_size =
                inner.written_size + inner.pending.len() as u64 > config.max_file_size;
            let over_count =
                inner.written_entries + inner.pending_entries > config.max_entry_count;
            // Rotate only a segment that already has content; a single batch
            // larger than the limits still has to land somewhere.
            if (over_size || over_count) && inner.written_entries > 0 {
                Self::finalize_locked(inner)?;
                Self::rotate_locked(inner, config)?;
            }

            let pending = std::mem::take(&mut inner.pending);
            inner.file.write_all(&pending)?;
            inner.hasher.update(&pending);
            inner.written_size += pending.len() as u64;
            inner.written_entries += inner.pending_entries;
            inner.pending_entries = 0;
        }
        if fsync {
            inner.file.sync_all()?;
        }
        Ok(())
    }

    fn finalize_locked(inner: &mut Inner) -> Result<()> {
        let digest = inner.hasher.clone().finalize();
        inner.file.write_all(&digest)?;
        inner.file.sync_all()?;
        debug!(
            target: "tokmesh::wal",
            segment = inner.segment_id,
            entries = inner.written_entries,
            size = inner.written_size,
            "finalized wal segment"
        );
        Ok(())
    }

    fn rotate_locked(inner: &mut Inner, config: &WalConfig) -> Result<()> {
        let next = Self::start_segment(&config.dir, inner.segment_id + 1)?;
        inner.file = next.file;
        inner.segment_id = next.segment_id;
        inner.written_size = next.written_size;
        inner.written_entries = 0;
        inner.hasher = next.hasher;
        Ok(())
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target: "tokmesh::wal", error = %e, "wal close on drop failed");
        }
    }
}
