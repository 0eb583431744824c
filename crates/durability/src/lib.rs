//! Durability layer for the TokMesh session store.
//!
//! Three subsystems live here:
//!
//! - **WAL**: an append-only segmented log of session mutations. Frames are
//!   length-prefixed, CRC-checked, and optionally encrypted; finalized
//!   segments carry a SHA-256 trailer.
//! - **Snapshots**: atomic full dumps of the in-memory store, each pinned to
//!   the composite WAL offset at which it is consistent.
//! - **Cipher seam**: an AEAD abstraction used for WAL frame payloads and
//!   snapshot bodies when encryption at rest is configured.

pub mod cipher;
pub mod format;
mod fsutil;
pub mod snapshot;
pub mod wal;

pub use cipher::{parse_cipher_key, AesGcmCipher, SegmentCipher};
pub use format::{composite_offset, split_offset, WalEntry, WalOp};
pub use snapshot::{SnapshotConfig, SnapshotInfo, SnapshotManager};
pub use wal::{SyncMode, WalCompactor, WalConfig, WalReader, WalWriter};
