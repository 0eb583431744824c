//! RESP (Redis-wire) front-end for the TokMesh engine.
//!
//! A RESP2 subset is exposed over TCP, optionally TLS: the Redis-compatible
//! verbs `GET/SET/DEL/EXPIRE/TTL/EXISTS/SCAN` plus the namespaced
//! `TM.CREATE/TM.VALIDATE/TM.REVOKE_USER`. Connections authenticate with
//! API keys carrying roles; authenticated commands pass a per-IP token
//! bucket before dispatch.

pub mod auth;
pub mod codec;
pub mod conn;
pub mod dispatch;
pub mod glob;
pub mod limiter;
pub mod server;

pub use auth::{ApiKey, Keyring};
pub use conn::{ConnState, Principal, Role};
pub use dispatch::Dispatcher;
pub use limiter::RateLimiter;
pub use server::{RespServer, ServerConfig, ServerHandle};
