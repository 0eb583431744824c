//! The session value type.
//!
//! A session is the only value the store holds: a server-side record that
//! authorizes a user, addressable by id and by token hash. All timestamps
//! are epoch milliseconds; `expires_at_ms == 0` means no expiry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::limits;
use crate::session_id::{generate_session_id, is_valid_session_id};
use crate::time::now_ms;
use crate::token::is_valid_token_hash;

/// A single authorized session.
///
/// `version` starts at 1 and increases by at least one on every successful
/// mutation; compare-and-set updates in the store rely on it. The `data`
/// map holds small client-defined attributes bounded by
/// [`limits::MAX_DATA_TOTAL_BYTES`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Immutable identity, `tmss-<ulid>`.
    pub id: String,

    /// Owning user, at most 128 bytes.
    pub user_id: String,

    /// `tmth_<64 hex>` hash of the plaintext token. Never the plaintext.
    pub token_hash: String,

    /// IP the session was created from.
    #[serde(default)]
    pub ip_address: String,

    /// User agent the session was created from.
    #[serde(default)]
    pub user_agent: String,

    /// IP of the most recent access, if any.
    #[serde(default)]
    pub last_access_ip: String,

    /// User agent of the most recent access, if any.
    #[serde(default)]
    pub last_access_ua: String,

    /// Client-supplied device identifier.
    #[serde(default)]
    pub device_id: String,

    /// Key id or subsystem that created the session.
    #[serde(default)]
    pub created_by: String,

    /// Creation time, epoch milliseconds.
    pub created_at_ms: u64,

    /// Absolute expiry, epoch milliseconds. Zero means no expiry.
    pub expires_at_ms: u64,

    /// Last activity time, epoch milliseconds.
    pub last_active_ms: u64,

    /// Small client-defined attribute map.
    #[serde(default)]
    pub data: BTreeMap<String, String>,

    /// Monotonically increasing mutation counter, starts at 1.
    pub version: u64,
}

impl Session {
    /// Create a fresh session for `user_id` with a generated id.
    ///
    /// The token hash starts empty; callers assign it before the session is
    /// validated or stored.
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = now_ms();
        Session {
            id: generate_session_id(),
            user_id: user_id.into(),
            token_hash: String::new(),
            ip_address: String::new(),
            user_agent: String::new(),
            last_access_ip: String::new(),
            last_access_ua: String::new(),
            device_id: String::new(),
            created_by: String::new(),
            created_at_ms: now,
            expires_at_ms: 0,
            last_active_ms: now,
            data: BTreeMap::new(),
            version: 1,
        }
    }

    /// True once the expiry instant has passed. Sessions without an expiry
    /// never expire.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms > 0 && now_ms > self.expires_at_ms
    }

    /// Milliseconds until expiry, or `None` when the session has no expiry.
    ///
    /// Returns `Some(0)` once expired.
    pub fn ttl_remaining(&self, now_ms: u64) -> Option<u64> {
        if self.expires_at_ms == 0 {
            return None;
        }
        Some(self.expires_at_ms.saturating_sub(now_ms))
    }

    /// Record an access: bumps `last_active_ms` and, when non-empty, the
    /// last-access ip/user-agent fields.
    pub fn touch(&mut self, ip: &str, user_agent: &str, now_ms: u64) {
        self.last_active_ms = now_ms;
        if !ip.is_empty() {
            self.last_access_ip = ip.to_string();
        }
        if !user_agent.is_empty() {
            self.last_access_ua = user_agent.to_string();
        }
    }

    /// Set an absolute expiry `ttl` from `now_ms`.
    pub fn set_expiration(&mut self, ttl: Duration, now_ms: u64) {
        self.expires_at_ms = now_ms + ttl.as_millis() as u64;
    }

    /// Push the expiry out by `dt`, only for sessions that already expire.
    pub fn extend(&mut self, dt: Duration) {
        if self.expires_at_ms > 0 {
            self.expires_at_ms += dt.as_millis() as u64;
        }
    }

    /// Bump the mutation counter.
    pub fn incr_version(&mut self) {
        self.version += 1;
    }

    /// Total bytes across keys and values of the data map.
    pub fn data_size(&self) -> usize {
        self.data.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    /// Validate all field invariants, collecting every violation into a
    /// single [`Error::Validation`] message.
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();

        if !is_valid_session_id(&self.id) {
            violations.push(format!("invalid session id '{}'", self.id));
        }
        if self.user_id.is_empty() {
            violations.push("user_id is required".to_string());
        } else if self.user_id.len() > limits::MAX_USER_ID_LEN {
            violations.push(format!(
                "user_id exceeds {} bytes",
                limits::MAX_USER_ID_LEN
            ));
        }
        if !is_valid_token_hash(&self.token_hash) {
            violations.push("invalid token hash".to_string());
        }
        if self.ip_address.len() > limits::MAX_IP_ADDRESS_LEN {
            violations.push(format!(
                "ip_address exceeds {} bytes",
                limits::MAX_IP_ADDRESS_LEN
            ));
        }
        if self.last_access_ip.len() > limits::MAX_IP_ADDRESS_LEN {
            violations.push(format!(
                "last_access_ip exceeds {} bytes",
                limits::MAX_IP_ADDRESS_LEN
            ));
        }
        if self.user_agent.len() > limits::MAX_USER_AGENT_LEN {
            violations.push(format!(
                "user_agent exceeds {} bytes",
                limits::MAX_USER_AGENT_LEN
            ));
        }
        if self.last_access_ua.len() > limits::MAX_USER_AGENT_LEN {
            violations.push(format!(
                "last_access_ua exceeds {} bytes",
                limits::MAX_USER_AGENT_LEN
            ));
        }
        if self.device_id.len() > limits::MAX_DEVICE_ID_LEN {
            violations.push(format!(
                "device_id exceeds {} bytes",
                limits::MAX_DEVICE_ID_LEN
            ));
        }
        for (key, value) in &self.data {
            if key.len() > limits::MAX_DATA_KEY_LEN {
                violations.push(format!(
                    "data key '{}' exceeds {} bytes",
                    truncate_for_log(key),
                    limits::MAX_DATA_KEY_LEN
                ));
            }
            if value.len() > limits::MAX_DATA_VALUE_LEN {
                violations.push(format!(
                    "data value for '{}' exceeds {} bytes",
                    truncate_for_log(key),
                    limits::MAX_DATA_VALUE_LEN
                ));
            }
        }
        if self.data_size() > limits::MAX_DATA_TOTAL_BYTES {
            violations.push(format!(
                "data exceeds {} total bytes",
                limits::MAX_DATA_TOTAL_BYTES
            ));
        }
        if self.version == 0 {
            violations.push("version must start at 1".to_string());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(violations.join("; ")))
        }
    }
}

fn truncate_for_log(s: &str) -> &str {
    match s.char_indices().nth(32) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
