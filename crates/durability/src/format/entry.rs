//! Logical WAL entry.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokmesh_core::{Error, Result, Session};

/// Mutation kind recorded in the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalOp {
    /// Session created; the entry carries the full session.
    Create = 1,
    /// Session replaced; the entry carries the full new state (no diffs).
    Update = 2,
    /// Session removed; the entry carries only the id.
    Delete = 3,
}

impl Serialize for WalOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for WalOp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            1 => Ok(WalOp::Create),
            2 => Ok(WalOp::Update),
            3 => Ok(WalOp::Delete),
            other => Err(D::Error::custom(format!("unknown wal op {}", other))),
        }
    }
}

/// One durable record of a session mutation.
///
/// CREATE and UPDATE carry the complete post-state of the session; DELETE
/// carries only the id. Replay applies entries in log order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Wall-clock time the mutation was accepted, epoch milliseconds.
    pub timestamp_ms: u64,
    /// Mutation kind.
    pub op: WalOp,
    /// Target session id.
    pub session_id: String,
    /// Session version after the mutation (used for UPDATE replay).
    pub version: u64,
    /// Full session state for CREATE/UPDATE; absent for DELETE.
    pub session: Option<Session>,
}

impl WalEntry {
    /// Entry for a freshly created session.
    pub fn create(session: &Session, now_ms: u64) -> Self {
        WalEntry {
            timestamp_ms: now_ms,
            op: WalOp::Create,
            session_id: session.id.clone(),
            version: session.version,
            session: Some(session.clone()),
        }
    }

    /// Entry for a replaced session.
    pub fn update(session: &Session, now_ms: u64) -> Self {
        WalEntry {
            timestamp_ms: now_ms,
            op: WalOp::Update,
            session_id: session.id.clone(),
            version: session.version,
            session: Some(session.clone()),
        }
    }

    /// Entry for a removed session.
    pub fn delete(session_id: impl Into<String>, now_ms: u64) -> Self {
        WalEntry {
            timestamp_ms: now_ms,
            op: WalOp::Delete,
            session_id: session_id.into(),
            version: 0,
            session: None,
        }
    }

    /// Structural validation: CREATE/UPDATE must carry a session payload.
    pub fn validate(&self) -> Result<()> {
        match self.op {
            WalOp::Create | WalOp::Update if self.session.is_none() => Err(Error::InvalidEntry(
                format!("{:?} entry for {} has no session payload", self.op, self.session_id),
            )),
            _ => Ok(()),
        }
    }
}
