//! API keyring for AUTH.
//!
//! Keys come from configuration; there is no CRUD surface here. Secrets
//! are held only as SHA-256 hashes and compared in constant time.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::conn::{Principal, Role};

/// One configured API key.
#[derive(Debug, Clone)]
pub struct ApiKey {
    /// Identifier presented as the first AUTH argument.
    pub key_id: String,
    /// SHA-256 of the secret.
    pub secret_hash: [u8; 32],
    /// Role granted on successful AUTH.
    pub role: Role,
    /// Human-readable name for logs.
    pub name: String,
}

impl ApiKey {
    /// Build a key record, hashing the plaintext secret.
    pub fn new(
        key_id: impl Into<String>,
        secret: &str,
        role: Role,
        name: impl Into<String>,
    ) -> Self {
        ApiKey {
            key_id: key_id.into(),
            secret_hash: Sha256::digest(secret.as_bytes()).into(),
            role,
            name: name.into(),
        }
    }
}

/// Lookup table from key id to key record.
#[derive(Debug, Default)]
pub struct Keyring {
    keys: HashMap<String, ApiKey>,
}

impl Keyring {
    /// Build a keyring from configured keys. Later duplicates win.
    pub fn new(keys: impl IntoIterator<Item = ApiKey>) -> Self {
        Keyring {
            keys: keys
                .into_iter()
                .map(|key| (key.key_id.clone(), key))
                .collect(),
        }
    }

    /// Verify a key id + secret pair, yielding the principal on success.
    ///
    /// Unknown ids and wrong secrets are indistinguishable to the caller.
    pub fn verify(&self, key_id: &str, secret: &str) -> Option<Principal> {
        let key = self.keys.get(key_id)?;
        let presented: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        if !ct_eq(&presented, &key.secret_hash) {
            return None;
        }
        Some(Principal {
            key_id: key.key_id.clone(),
            role: key.role,
            name: key.name.clone(),
        })
    }

    /// Number of configured keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when no keys are configured.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Constant-time equality over fixed-length digests.
fn ct_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
