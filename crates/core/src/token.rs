//! Token generation, hashing, and masking.
//!
//! A plaintext token is `tmtk_` followed by the base64url (no padding)
//! encoding of 32 CSPRNG bytes: 48 characters total. Only its hash is ever
//! persisted: `tmth_` + 64 lower-hex characters of SHA-256 over the full
//! plaintext, 69 characters total. Plaintext tokens appear in logs only
//! through [`mask_token`].

use rand::RngCore;
use sha2::{Digest, Sha256};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Prefix of a plaintext token.
pub const TOKEN_PREFIX: &str = "tmtk_";

/// Total length of a plaintext token (`tmtk_` + 43 base64url chars).
pub const TOKEN_LEN: usize = 48;

/// Prefix of a persisted token hash.
pub const TOKEN_HASH_PREFIX: &str = "tmth_";

/// Total length of a token hash (`tmth_` + 64 hex chars).
pub const TOKEN_HASH_LEN: usize = 69;

/// Generate a fresh token, returning `(plaintext, hash)`.
pub fn generate_token() -> (String, String) {
    let mut raw = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    let plaintext = format!("{}{}", TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(raw));
    let hash = hash_token(&plaintext);
    (plaintext, hash)
}

/// Hash a plaintext token into its persisted form.
pub fn hash_token(plaintext: &str) -> String {
    use std::fmt::Write;
    let digest = Sha256::digest(plaintext.as_bytes());
    let mut hex = String::with_capacity(TOKEN_HASH_LEN);
    hex.push_str(TOKEN_HASH_PREFIX);
    for b in digest {
        let _ = write!(hex, "{:02x}", b);
    }
    hex
}

/// Validate the shape of a plaintext token.
pub fn is_valid_token(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token.starts_with(TOKEN_PREFIX)
        && URL_SAFE_NO_PAD
            .decode(&token[TOKEN_PREFIX.len()..])
            .map(|raw| raw.len() == 32)
            .unwrap_or(false)
}

/// Validate the shape of a token hash.
pub fn is_valid_token_hash(hash: &str) -> bool {
    hash.len() == TOKEN_HASH_LEN
        && hash.starts_with(TOKEN_HASH_PREFIX)
        && hash[TOKEN_HASH_PREFIX.len()..]
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Redact a token for log output: `tmtk_ABC...xyz`.
///
/// Anything too short (or not ASCII) to mask safely is replaced wholesale.
pub fn mask_token(token: &str) -> String {
    if !token.is_ascii() || token.len() < TOKEN_PREFIX.len() + 8 {
        return "***".to_string();
    }
    let head = &token[..TOKEN_PREFIX.len() + 3];
    let tail = &token[token.len() - 3..];
    format!("{}...{}", head, tail)
}
