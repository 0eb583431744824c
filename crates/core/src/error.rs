//! Error types for the TokMesh session store.
//!
//! A single unified error enum is shared across the storage engine and the
//! RESP front-end. We use `thiserror` for the `Display` and `Error` trait
//! implementations.
//!
//! # Wire codes
//!
//! Domain errors carry a machine-readable taxon of the form `TM-XXX-NNNN`
//! that the dispatcher prepends to RESP error replies
//! (`-ERR TM-SESS-4040 session not found ...`). Errors without a taxon
//! (I/O, corruption) surface as free-form `ERR` strings.

use std::io;
use thiserror::Error;

/// Result type alias for TokMesh operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all TokMesh operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Session failed validation; the message lists every violation.
    #[error("{0}")]
    Validation(String),

    /// Session does not exist (or is expired, which reads treat as absent).
    #[error("session not found: {0}")]
    NotFound(String),

    /// Session exists but its expiry has passed.
    #[error("session expired: {0}")]
    Expired(String),

    /// A session with the same id already exists.
    #[error("session already exists: {0}")]
    Conflict(String),

    /// Compare-and-set failed: stored version differs from the expected one.
    #[error("version conflict for {id}: expected {expected}, got {actual}")]
    VersionConflict {
        /// Session id the update targeted
        id: String,
        /// Version the caller expected to replace
        expected: u64,
        /// Version actually stored
        actual: u64,
    },

    /// The user already holds the maximum number of live sessions.
    #[error("session quota exceeded for user {user_id}: limit {limit}")]
    QuotaExceeded {
        /// User id that hit the quota
        user_id: String,
        /// Configured per-user session cap
        limit: usize,
    },

    /// SET created a new session without supplying a plaintext token.
    #[error("token is required when creating new session with SET")]
    TokenRequired,

    /// More keys than the command allows.
    #[error("maximum {max} keys per {command} command")]
    TooManyKeys {
        /// Command name (upper-case)
        command: &'static str,
        /// Maximum number of keys accepted
        max: usize,
    },

    /// SET tried to replace the token of an existing session.
    #[error("token rotation via SET not supported, recreate session instead")]
    TokenRotation,

    /// Token failed format validation or no session matches its hash.
    #[error("Token invalid")]
    TokenInvalid,

    /// Token resolves to a session whose expiry has passed.
    #[error("Token expired")]
    TokenExpired,

    /// AUTH presented an unknown key id or a wrong secret.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Authenticated principal's role does not allow the command.
    #[error("permission denied for command '{command}'")]
    PermissionDenied {
        /// The denied command (upper-case)
        command: String,
    },

    /// Per-IP token bucket is exhausted.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Append after the WAL writer was closed.
    #[error("wal writer is closed")]
    WriterClosed,

    /// A WAL entry is structurally invalid (e.g. CREATE without a payload).
    #[error("invalid wal entry: {0}")]
    InvalidEntry(String),

    /// On-disk data failed an integrity or cipher check.
    #[error("corrupted data: {0}")]
    Corrupted(String),

    /// No intact snapshot could be loaded.
    #[error("no snapshots available")]
    NoSnapshots,

    /// I/O error from the file system or network.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic storage-layer failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Wire taxon (`TM-XXX-NNNN`) for domain errors, `None` otherwise.
    pub fn wire_code(&self) -> Option<&'static str> {
        match self {
            Error::Validation(_) => Some("TM-SESS-4001"),
            Error::QuotaExceeded { .. } => Some("TM-SESS-4002"),
            Error::NotFound(_) => Some("TM-SESS-4040"),
            Error::Expired(_) => Some("TM-SESS-4041"),
            Error::Conflict(_) => Some("TM-SESS-4090"),
            Error::VersionConflict { .. } => Some("TM-SESS-4091"),
            Error::TokenRequired => Some("TM-ARG-4001"),
            Error::TooManyKeys { .. } => Some("TM-ARG-4002"),
            Error::TokenRotation => Some("TM-ARG-4003"),
            Error::TokenInvalid => Some("TM-TOKN-4010"),
            Error::TokenExpired => Some("TM-TOKN-4011"),
            Error::InvalidCredentials => Some("TM-AUTH-4010"),
            Error::PermissionDenied { .. } => Some("TM-AUTH-4030"),
            Error::RateLimited => Some("TM-RATE-4290"),
            _ => None,
        }
    }

    /// True for errors that recovery replay swallows: they only indicate
    /// snapshot/WAL overlap, not damage.
    pub fn is_replay_benign(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::Conflict(_) | Error::VersionConflict { .. }
        )
    }

    /// True if a read should treat the session as absent.
    pub fn is_absent(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Expired(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
