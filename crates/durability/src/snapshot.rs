//! Snapshot manager: atomic full dumps of the session store.
//!
//! # File layout
//!
//! ```text
//! ┌───────────────────────────────┐
//! │ Magic "TOKMSNAP" (8 bytes)    │
//! ├───────────────────────────────┤
//! │ Header length (4B LE)         │
//! ├───────────────────────────────┤
//! │ Header JSON                   │
//! ├───────────────────────────────┤
//! │ Body length (4B LE)           │
//! ├───────────────────────────────┤
//! │ Body (JSON array of sessions, │
//! │ sealed when encrypted)        │
//! ├───────────────────────────────┤
//! │ Trailer SHA-256 over all      │
//! │ prior bytes (32 bytes)        │
//! └───────────────────────────────┘
//! ```
//!
//! Files are written with the write-fsync-rename pattern, so either a
//! complete snapshot exists or none does. `load` walks candidates newest
//! first and falls back past any file that fails a check.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use tokmesh_core::{now_ms, Error, Result, Session};

use crate::cipher::SegmentCipher;
use crate::fsutil::{create_dir_secure, create_file_secure, sync_dir};

/// Magic bytes opening every snapshot file.
pub const SNAPSHOT_MAGIC: [u8; 8] = *b"TOKMSNAP";

/// Length of the SHA-256 trailer.
const TRAILER_LEN: usize = 32;

/// Snapshot manager configuration.
#[derive(Clone)]
pub struct SnapshotConfig {
    /// Directory holding `snapshot-*.snap` files.
    pub dir: PathBuf,
    /// Node identity recorded in every header.
    pub node_id: String,
    /// Keep this many most-recent snapshots through `prune`.
    pub retention_count: usize,
    /// Also keep snapshots younger than this many days.
    pub retention_days: u32,
    /// Body encryption; headers stay plaintext.
    pub cipher: Option<Arc<dyn SegmentCipher>>,
}

impl SnapshotConfig {
    /// Configuration with defaults for the given directory.
    pub fn new(dir: impl Into<PathBuf>, node_id: impl Into<String>) -> Self {
        SnapshotConfig {
            dir: dir.into(),
            node_id: node_id.into(),
            retention_count: 5,
            retention_days: 7,
            cipher: None,
        }
    }

    /// Set the count-based retention bound.
    pub fn with_retention_count(mut self, count: usize) -> Self {
        self.retention_count = count;
        self
    }

    /// Set the age-based retention bound.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Enable body encryption.
    pub fn with_cipher(mut self, cipher: Arc<dyn SegmentCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }
}

/// Plaintext JSON header at the front of every snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotHeader {
    node_id: String,
    wal_last_offset: u64,
    session_count: usize,
    created_at_ms: u64,
    encrypted: bool,
}

/// Metadata of a written or loaded snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    /// Path of the snapshot file.
    pub path: PathBuf,
    /// Node that produced it.
    pub node_id: String,
    /// Composite WAL offset the snapshot is consistent at.
    pub wal_last_offset: u64,
    /// Number of sessions in the body.
    pub session_count: usize,
    /// File size in bytes.
    pub size: u64,
    /// SHA-256 trailer, lower hex.
    pub checksum: String,
    /// Creation time from the header, epoch milliseconds.
    pub created_at_ms: u64,
}

/// Writes, loads, and prunes snapshots.
pub struct SnapshotManager {
    config: SnapshotConfig,
}

impl SnapshotManager {
    /// Create a manager, ensuring the directory exists.
    pub fn new(config: SnapshotConfig) -> Result<Self> {
        create_dir_secure(&config.dir)?;
        Ok(SnapshotManager { config })
    }

    /// Write a snapshot of `sessions`, pinned to `wal_last_offset`.
    pub fn create(&self, sessions: &[Session], wal_last_offset: u64) -> Result<SnapshotInfo> {
        let created_at_ms = now_ms();
        let name = self.next_file_name(created_at_ms);
        let final_path = self.config.dir.join(&name);
        let temp_path = self.config.dir.join(format!(".{}.tmp", name));

        let body_plain = serde_json::to_vec(sessions)?;
        let (body, encrypted) = match &self.config.cipher {
            Some(cipher) => (
                cipher
                    .seal(&body_plain)
                    .map_err(|e| Error::Storage(e.to_string()))?,
                true,
            ),
            None => (body_plain, false),
        };

        let header = SnapshotHeader {
            node_id: self.config.node_id.clone(),
            wal_last_offset,
            session_count: sessions.len(),
            created_at_ms,
            encrypted,
        };
        let header_bytes = serde_json::to_vec(&header)?;

        let mut file = create_file_secure(&temp_path)?;
        let mut hasher = Sha256::new();
        let mut write = |file: &mut std::fs::File, hasher: &mut Sha256, bytes: &[u8]| -> Result<()> {
            file.write_all(bytes)?;
            hasher.update(bytes);
            Ok(())
        };

        write(&mut file, &mut hasher, &SNAPSHOT_MAGIC)?;
        write(&mut file, &mut hasher, &(header_bytes.len() as u32).to_le_bytes())?;
        write(&mut file, &mut hasher, &header_bytes)?;
        write(&mut file, &mut hasher, &(body.len() as u32).to_le_bytes())?;
        write(&mut file, &mut hasher, &body)?;

        let digest = hasher.finalize();
        file.write_all(&digest)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, &final_path)?;
        sync_dir(&self.config.dir)?;

        let size = std::fs::metadata(&final_path)?.len();
        let info = SnapshotInfo {
            path: final_path,
            node_id: header.node_id,
            wal_last_offset,
            session_count: sessions.len(),
            size,
            checksum: hex_digest(&digest),
            created_at_ms,
        };
        info!(
            target: "tokmesh::snapshot",
            path = %info.path.display(),
            sessions = info.session_count,
            wal_last_offset,
            encrypted,
            "snapshot written"
        );
        Ok(info)
    }

    /// Load the newest intact snapshot.
    ///
    /// Candidates are tried newest first; any file failing a magic, length,
    /// trailer, or cipher check is skipped with a warning. `no_snapshots`
    /// is returned when every candidate is exhausted.
    pub fn load(&self) -> Result<(Vec<Session>, SnapshotInfo)> {
        let mut names = self.list_snapshot_names()?;
        names.sort_by(|a, b| b.cmp(a));

        for name in names {
            let path = self.config.dir.join(&name);
            match self.load_file(&path) {
                Ok(loaded) => return Ok(loaded),
                Err(e) => {
                    warn!(
                        target: "tokmesh::snapshot",
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable snapshot"
                    );
                }
            }
        }
        Err(Error::NoSnapshots)
    }

    /// Remove snapshots outside both retention bounds.
    ///
    /// A file survives when it is among the `retention_count` newest or its
    /// mtime is within `retention_days`. Failures to remove individual
    /// files are non-fatal.
    pub fn prune(&self) -> Result<usize> {
        let mut names = self.list_snapshot_names()?;
        names.sort_by(|a, b| b.cmp(a));

        let age_floor = SystemTime::now()
            .checked_sub(Duration::from_secs(self.config.retention_days as u64 * 86_400));

        let mut removed = 0;
        for (idx, name) in names.iter().enumerate() {
            if idx < self.config.retention_count {
                continue;
            }
            let path = self.config.dir.join(name);
            let young = match (age_floor, std::fs::metadata(&path).and_then(|m| m.modified())) {
                (Some(floor), Ok(mtime)) => mtime >= floor,
                // Unknown age: keep the file.
                _ => true,
            };
            if young {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(target: "tokmesh::snapshot", path = %path.display(), "pruned snapshot");
                    removed += 1;
                }
                Err(e) => {
                    warn!(target: "tokmesh::snapshot", path = %path.display(), error = %e, "prune failed")
                }
            }
        }
        Ok(removed)
    }

    fn load_file(&self, path: &Path) -> Result<(Vec<Session>, SnapshotInfo)> {
        let bytes = std::fs::read(path)?;
        let min_len = SNAPSHOT_MAGIC.len() + 4 + 4 + TRAILER_LEN;
        if bytes.len() < min_len {
            return Err(Error::Corrupted("snapshot too short".to_string()));
        }
        if bytes[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
            return Err(Error::Corrupted("bad snapshot magic".to_string()));
        }

        let (body_end, trailer) = bytes.split_at(bytes.len() - TRAILER_LEN);
        let digest = Sha256::digest(body_end);
        if digest.as_slice() != trailer {
            return Err(Error::Corrupted("snapshot trailer mismatch".to_string()));
        }

        let mut pos = SNAPSHOT_MAGIC.len();
        let header_len = read_u32(body_end, &mut pos)? as usize;
        let header_bytes = read_slice(body_end, &mut pos, header_len)?;
        let header: SnapshotHeader = serde_json::from_slice(header_bytes)?;

        let body_len = read_u32(body_end, &mut pos)? as usize;
        let body = read_slice(body_end, &mut pos, body_len)?;
        if pos != body_end.len() {
            return Err(Error::Corrupted("snapshot has trailing bytes".to_string()));
        }

        let body_plain = if header.encrypted {
            let cipher = self.config.cipher.as_ref().ok_or_else(|| {
                Error::Corrupted("snapshot is encrypted but no cipher is configured".to_string())
            })?;
            cipher
                .open(body)
                .map_err(|e| Error::Corrupted(format!("snapshot body: {}", e)))?
        } else {
            body.to_vec()
        };
        let sessions: Vec<Session> = serde_json::from_slice(&body_plain)?;

        if sessions.len() != header.session_count {
            return Err(Error::Corrupted(format!(
                "snapshot header claims {} sessions, body has {}",
                header.session_count,
                sessions.len()
            )));
        }

        let info = SnapshotInfo {
            path: path.to_path_buf(),
            node_id: header.node_id,
            wal_last_offset: header.wal_last_offset,
            session_count: header.session_count,
            size: bytes.len() as u64,
            checksum: hex_digest(trailer),
            created_at_ms: header.created_at_ms,
        };
        Ok((sessions, info))
    }

    /// Name a new snapshot: `snapshot-<yyyymmddHHMMSS>-<seq:04>.snap`,
    /// where seq is the next unused sequence within this second.
    fn next_file_name(&self, created_at_ms: u64) -> String {
        let stamp = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(created_at_ms as i64)
            .unwrap_or(chrono::DateTime::UNIX_EPOCH)
            .format("%Y%m%d%H%M%S")
            .to_string();
        let prefix = format!("snapshot-{}-", stamp);

        let next_seq = self
            .list_snapshot_names()
            .unwrap_or_default()
            .iter()
            .filter_map(|name| {
                name.strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(".snap"))
                    .and_then(|seq| seq.parse::<u32>().ok())
            })
            .max()
            .map(|max| max + 1)
            .unwrap_or(1);
        format!("{}{:04}.snap", prefix, next_seq)
    }

    fn list_snapshot_names(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.config.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().to_string();
            if name.starts_with("snapshot-") && name.ends_with(".snap") {
                names.push(name);
            }
        }
        Ok(names)
    }
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    let end = *pos + 4;
    if end > bytes.len() {
        return Err(Error::Corrupted("snapshot length field out of bounds".to_string()));
    }
    let value = u32::from_le_bytes(bytes[*pos..end].try_into().unwrap());
    *pos = end;
    Ok(value)
}

fn read_slice<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = pos.checked_add(len).ok_or_else(|| {
        Error::Corrupted("snapshot section length overflow".to_string())
    })?;
    if end > bytes.len() {
        return Err(Error::Corrupted("snapshot section out of bounds".to_string()));
    }
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

fn hex_digest(digest: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
