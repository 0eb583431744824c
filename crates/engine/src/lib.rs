//! The TokMesh engine: binds the sharded store, the WAL, and the snapshot
//! manager into one durable session service.
//!
//! Every mutation is appended to the WAL before it touches memory, so no
//! acknowledgement escapes before durability (subject to the configured
//! sync mode). Recovery rebuilds the store from the newest intact snapshot
//! plus a replay of the WAL tail.

mod background;
mod config;
mod engine;

pub use config::EngineConfig;
pub use engine::{CreateParams, EngineStats, RecoveryStats, SessionEngine};
