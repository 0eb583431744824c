//! Size limits and defaults for session fields.
//!
//! These bounds are enforced by [`crate::session::Session::validate`] and by
//! the storage layer's per-user quota check.

/// Maximum length of a user id in bytes.
pub const MAX_USER_ID_LEN: usize = 128;

/// Maximum length of an IP address string (IPv6 with scope fits in 45).
pub const MAX_IP_ADDRESS_LEN: usize = 45;

/// Maximum length of a user-agent string in bytes.
pub const MAX_USER_AGENT_LEN: usize = 512;

/// Maximum length of a device id in bytes.
pub const MAX_DEVICE_ID_LEN: usize = 128;

/// Maximum length of a single key in the session data map.
pub const MAX_DATA_KEY_LEN: usize = 64;

/// Maximum length of a single value in the session data map.
pub const MAX_DATA_VALUE_LEN: usize = 1024;

/// Maximum total bytes across all keys and values of the data map.
pub const MAX_DATA_TOTAL_BYTES: usize = 4096;

/// Default cap on live sessions per user id.
pub const DEFAULT_MAX_SESSIONS_PER_USER: usize = 50;

/// Default session lifetime applied when no TTL is given (24 hours).
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
