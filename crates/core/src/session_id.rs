//! Session id format.
//!
//! Session ids have the shape `tmss-<26-char-Crockford-base32 ULID>` in
//! lower case, 31 characters total. The ULID body gives ids a sortable
//! time component and 80 bits of randomness.

use ulid::Ulid;

/// Prefix every session id carries.
pub const SESSION_ID_PREFIX: &str = "tmss-";

/// Length of the ULID body.
pub const ULID_LEN: usize = 26;

/// Total length of a session id (`tmss-` + 26).
pub const SESSION_ID_LEN: usize = 31;

/// Generate a fresh session id.
pub fn generate_session_id() -> String {
    format!(
        "{}{}",
        SESSION_ID_PREFIX,
        Ulid::new().to_string().to_lowercase()
    )
}

/// Lower-case a candidate id for comparison and storage.
pub fn normalize_session_id(id: &str) -> String {
    id.to_ascii_lowercase()
}

/// Validate a session id: prefix, length, and a parseable ULID body.
///
/// Case is normalized before checking, so `TMSS-...` is accepted.
pub fn is_valid_session_id(id: &str) -> bool {
    let id = normalize_session_id(id);
    if id.len() != SESSION_ID_LEN || !id.starts_with(SESSION_ID_PREFIX) {
        return false;
    }
    let body = &id[SESSION_ID_PREFIX.len()..];
    if body.len() != ULID_LEN {
        return false;
    }
    Ulid::from_string(&body.to_ascii_uppercase()).is_ok()
}
