//! Core types for the TokMesh session store.
//!
//! This crate defines the session value type, the id/token formats with
//! their validators, and the unified error taxonomy shared by the storage
//! engine and the RESP front-end. It has no I/O of its own.

pub mod error;
pub mod limits;
pub mod session;
pub mod session_id;
pub mod time;
pub mod token;

pub use error::{Error, Result};
pub use session::Session;
pub use session_id::{generate_session_id, is_valid_session_id, normalize_session_id};
pub use time::now_ms;
pub use token::{generate_token, hash_token, is_valid_token, is_valid_token_hash, mask_token};
