//! In-memory sharded session storage.
//!
//! The store is the exclusive owner of live [`Session`] values. Sessions are
//! spread across a power-of-two number of shards by id hash; two secondary
//! indexes (user id, token hash) resolve the other access paths.
//!
//! [`Session`]: tokmesh_core::Session

mod store;

pub use store::{SessionFilter, SessionStore, StoreConfig};
