//! Segment naming, trailers, and composite offsets.

use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;

/// Magic bytes opening every WAL segment.
pub const SEGMENT_MAGIC: [u8; 8] = *b"TOKMWAL\x01";

/// Length of the SHA-256 trailer a finalized segment carries.
pub const TRAILER_LEN: usize = 32;

/// File name for a segment id: `wal-<8-digit-zero-padded>.log`.
pub fn segment_file_name(id: u32) -> String {
    format!("wal-{:08}.log", id)
}

/// Parse a segment id out of a file name, `None` for foreign files.
pub fn parse_segment_id(name: &str) -> Option<u32> {
    let body = name.strip_prefix("wal-")?.strip_suffix(".log")?;
    if body.len() != 8 || !body.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    body.parse().ok()
}

/// List segment ids in a directory, ascending. A missing directory is empty.
pub fn list_segment_ids(dir: &Path) -> io::Result<Vec<u32>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(id) = parse_segment_id(&entry.file_name().to_string_lossy()) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Check whether segment bytes end with a valid SHA-256 trailer.
///
/// A segment is finalized when its last 32 bytes equal the SHA-256 of
/// everything before them.
pub fn has_valid_trailer(bytes: &[u8]) -> bool {
    if bytes.len() < SEGMENT_MAGIC.len() + TRAILER_LEN {
        return false;
    }
    let (body, trailer) = bytes.split_at(bytes.len() - TRAILER_LEN);
    let digest = Sha256::digest(body);
    digest.as_slice() == trailer
}

/// Check a segment file on disk for a valid trailer.
pub fn is_finalized_segment(path: &Path) -> io::Result<bool> {
    let bytes = std::fs::read(path)?;
    Ok(has_valid_trailer(&bytes))
}

/// Build a composite WAL offset: `(segment_id << 32) | byte_offset`.
///
/// Byte offsets count from the start of the segment and never include a
/// trailer, so the value is monotonic across the whole log.
pub fn composite_offset(segment_id: u32, byte_offset: u32) -> u64 {
    ((segment_id as u64) << 32) | byte_offset as u64
}

/// Split a composite offset into `(segment_id, byte_offset)`.
pub fn split_offset(offset: u64) -> (u32, u32) {
    ((offset >> 32) as u32, offset as u32)
}
