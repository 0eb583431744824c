//! # TokMesh
//!
//! A durable single-node session store with a Redis-wire (RESP2) access
//! plane.
//!
//! Sessions live in a sharded in-memory map backed by a write-ahead log of
//! framed, checksummed, optionally encrypted segments. Periodic snapshots
//! bound recovery time; crash recovery replays the WAL tail past the
//! newest intact snapshot. The RESP front-end maps Redis-compatible verbs
//! (`GET/SET/DEL/EXPIRE/TTL/EXISTS/SCAN`) and the namespaced
//! `TM.CREATE/TM.VALIDATE/TM.REVOKE_USER` onto the engine, with API-key
//! authentication, role checks, and per-IP rate limiting.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokmesh::{ApiKey, EngineConfig, Keyring, RespServer, Role, ServerConfig, SessionEngine};
//!
//! #[tokio::main]
//! async fn main() -> tokmesh::Result<()> {
//!     let engine = SessionEngine::open(EngineConfig::new("./data"))?;
//!
//!     let keyring = Arc::new(Keyring::new([ApiKey::new(
//!         "ops", "change-me", Role::Admin, "operations",
//!     )]));
//!     let server = RespServer::new(ServerConfig::default(), Arc::clone(&engine), keyring);
//!     let handle = server.start().await?;
//!
//!     // ... serve until told otherwise ...
//!     handle.shutdown().await?;
//!     engine.close()?;
//!     Ok(())
//! }
//! ```

pub use tokmesh_core::token;
pub use tokmesh_core::{Error, Result, Session};
pub use tokmesh_engine::{CreateParams, EngineConfig, EngineStats, RecoveryStats, SessionEngine};
pub use tokmesh_server::{
    ApiKey, ConnState, Dispatcher, Keyring, RespServer, Role, ServerConfig, ServerHandle,
};
pub use tokmesh_storage::{SessionFilter, SessionStore, StoreConfig};

/// Durability building blocks, exposed for tooling and tests.
pub mod durability {
    pub use tokmesh_durability::{
        composite_offset, split_offset, AesGcmCipher, SegmentCipher, SnapshotConfig, SnapshotInfo,
        SnapshotManager, SyncMode, WalCompactor, WalConfig, WalEntry, WalOp, WalReader, WalWriter,
    };
    pub use tokmesh_durability::cipher::parse_cipher_key;
}
