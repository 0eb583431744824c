//! On-disk WAL formats.
//!
//! # Segment layout
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ Magic "TOKMWAL\x01" (8 bytes)        │
//! ├──────────────────────────────────────┤
//! │ Entry frame 1                        │
//! ├──────────────────────────────────────┤
//! │ ...                                  │
//! ├──────────────────────────────────────┤
//! │ Trailer SHA-256 (32 bytes, finalized │
//! │ segments only)                       │
//! └──────────────────────────────────────┘
//! ```
//!
//! # Frame layout
//!
//! ```text
//! ┌──────────────────┬─────────────────────┬────────────┐
//! │ Length (4B LE)   │ Payload (variable)  │ CRC32 (4B) │
//! └──────────────────┴─────────────────────┴────────────┘
//! ```
//!
//! The payload is the version-tagged MessagePack encoding of a
//! [`WalEntry`]; with encryption enabled, it is the sealed form of that
//! encoding and the length field counts ciphertext bytes. The CRC always
//! covers the payload exactly as it appears on disk.

mod entry;
mod frame;
mod segment;

pub use entry::{WalEntry, WalOp};
pub use frame::{decode_frame, encode_frame, frame_len, FrameError, MAX_FRAME_LEN};
pub use segment::{
    composite_offset, has_valid_trailer, is_finalized_segment, list_segment_ids, parse_segment_id,
    segment_file_name, split_offset, SEGMENT_MAGIC, TRAILER_LEN,
};
