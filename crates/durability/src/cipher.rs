//! Authenticated encryption seam for WAL frames and snapshot bodies.
//!
//! The cipher is keyed at construction with 32 bytes. Every `seal` call
//! draws its own nonce and prepends it to the ciphertext, so the format
//! needs no external nonce bookkeeping. `open` refuses any bit-flip.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use thiserror::Error;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

/// Cipher errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// Encryption failed.
    #[error("seal failed: {0}")]
    Seal(String),

    /// Decryption or authentication failed.
    #[error("open failed: {0}")]
    Open(String),

    /// Ciphertext shorter than nonce + tag.
    #[error("ciphertext too short: {0} bytes")]
    TooShort(usize),

    /// Key material is not 32 bytes.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Authenticated encryption for storage payloads.
///
/// Implementations must be safe to share across threads; the WAL writer and
/// the snapshot manager hold the same instance.
pub trait SegmentCipher: Send + Sync {
    /// Encrypt `plaintext`, embedding the nonce in the output.
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Decrypt and authenticate `ciphertext`. Fails on any modification.
    fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Stable identifier recorded for diagnostics.
    fn cipher_id(&self) -> &'static str;
}

/// AES-256-GCM cipher. Output layout: `[nonce 12B][ciphertext+tag]`.
pub struct AesGcmCipher {
    inner: Aes256Gcm,
}

impl AesGcmCipher {
    /// Construct from a 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        AesGcmCipher {
            inner: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }
}

impl SegmentCipher for AesGcmCipher {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .inner
            .encrypt(&nonce, plaintext)
            .map_err(|e| CipherError::Seal(e.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::TooShort(ciphertext.len()));
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        self.inner
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|e| CipherError::Open(e.to_string()))
    }

    fn cipher_id(&self) -> &'static str {
        "aes-256-gcm"
    }
}

/// Parse a 32-byte cipher key given as 64 hex characters or as base64.
pub fn parse_cipher_key(raw: &str) -> Result<[u8; 32], CipherError> {
    let raw = raw.trim();
    let bytes = if raw.len() == 64 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        let mut out = Vec::with_capacity(32);
        for chunk in raw.as_bytes().chunks(2) {
            let s = std::str::from_utf8(chunk).map_err(|e| CipherError::InvalidKey(e.to_string()))?;
            out.push(
                u8::from_str_radix(s, 16).map_err(|e| CipherError::InvalidKey(e.to_string()))?,
            );
        }
        out
    } else {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        STANDARD
            .decode(raw)
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?
    };
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CipherError::InvalidKey(format!("expected 32 bytes, got {}", len)))
}
