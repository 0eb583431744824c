//! Entry frame codec: `[len u32 LE][payload][crc32 u32 LE]`.
//!
//! The payload is a 1-byte format version followed by the MessagePack
//! encoding of the entry. With a cipher, the whole version-tagged encoding
//! is sealed and the length field counts ciphertext bytes. The CRC covers
//! the payload bytes exactly as written, so integrity is checked before any
//! decryption is attempted.

use crc32fast::Hasher;
use thiserror::Error;

use super::entry::WalEntry;
use crate::cipher::SegmentCipher;

/// Payload format version tag.
pub const FRAME_FORMAT_VERSION: u8 = 1;

/// Upper bound on a single frame payload; anything larger is corruption.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Frame decode errors.
///
/// `Incomplete` is the crash-tolerance case: a partial frame at the tail of
/// an open segment. Everything else means the bytes cannot be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Not enough bytes for a whole frame; expected at the tail of an open
    /// segment after a crash.
    #[error("incomplete frame")]
    Incomplete,

    /// Length field exceeds [`MAX_FRAME_LEN`] or is zero.
    #[error("implausible frame length {0}")]
    BadLength(u64),

    /// CRC32 over the payload did not match.
    #[error("frame checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// CRC stored in the frame
        stored: u32,
        /// CRC computed over the payload
        computed: u32,
    },

    /// Decryption or authentication failed.
    #[error("frame cipher error: {0}")]
    Cipher(String),

    /// Payload carries an unknown format version.
    #[error("unsupported frame format version {0}")]
    UnsupportedVersion(u8),

    /// CRC was valid but the payload did not parse.
    #[error("frame decode error: {0}")]
    Decode(String),
}

/// Serialize an entry into a complete frame.
pub fn encode_frame(
    entry: &WalEntry,
    cipher: Option<&dyn SegmentCipher>,
) -> Result<Vec<u8>, FrameError> {
    let encoded = rmp_serde::to_vec(entry).map_err(|e| FrameError::Decode(e.to_string()))?;
    let mut payload = Vec::with_capacity(1 + encoded.len());
    payload.push(FRAME_FORMAT_VERSION);
    payload.extend_from_slice(&encoded);

    let payload = match cipher {
        Some(c) => c.seal(&payload).map_err(|e| FrameError::Cipher(e.to_string()))?,
        None => payload,
    };

    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    let mut frame = Vec::with_capacity(4 + payload.len() + 4);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Decode one frame from the front of `bytes`.
///
/// Returns the entry and the number of bytes consumed.
pub fn decode_frame(
    bytes: &[u8],
    cipher: Option<&dyn SegmentCipher>,
) -> Result<(WalEntry, usize), FrameError> {
    let (payload, consumed) = split_frame(bytes)?;

    let payload = match cipher {
        Some(c) => c.open(payload).map_err(|e| FrameError::Cipher(e.to_string()))?,
        None => payload.to_vec(),
    };

    if payload.is_empty() {
        return Err(FrameError::Decode("empty payload".to_string()));
    }
    if payload[0] != FRAME_FORMAT_VERSION {
        return Err(FrameError::UnsupportedVersion(payload[0]));
    }
    let entry: WalEntry =
        rmp_serde::from_slice(&payload[1..]).map_err(|e| FrameError::Decode(e.to_string()))?;
    Ok((entry, consumed))
}

/// Validate framing and CRC without touching the payload contents.
///
/// Used by the writer when resuming an open segment: it walks frames to
/// find the last valid boundary without needing the cipher.
pub fn frame_len(bytes: &[u8]) -> Result<usize, FrameError> {
    let (_, consumed) = split_frame(bytes)?;
    Ok(consumed)
}

fn split_frame(bytes: &[u8]) -> Result<(&[u8], usize), FrameError> {
    if bytes.len() < 4 {
        return Err(FrameError::Incomplete);
    }
    let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(FrameError::BadLength(len as u64));
    }
    let total = 4 + len + 4;
    if bytes.len() < total {
        return Err(FrameError::Incomplete);
    }

    let payload = &bytes[4..4 + len];
    let stored = u32::from_le_bytes(bytes[4 + len..total].try_into().unwrap());
    let mut hasher = Hasher::new();
    hasher.update(payload);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(FrameError::ChecksumMismatch { stored, computed });
    }
    Ok((payload, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::AesGcmCipher;
    use tokmesh_core::token::generate_token;
    use tokmesh_core::Session;

    fn sample_entry() -> WalEntry {
        let mut s = Session::new("u1");
        let (_, hash) = generate_token();
        s.token_hash = hash;
        s.data.insert("k".to_string(), "v".to_string());
        WalEntry::create(&s, 42)
    }

    #[test]
    fn test_roundtrip_plaintext() {
        let entry = sample_entry();
        let frame = encode_frame(&entry, None).unwrap();
        let (decoded, consumed) = decode_frame(&frame, None).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn test_roundtrip_delete_entry() {
        let entry = WalEntry::delete("tmss-01arz3ndektsv4rrffq69g5fav", 7);
        let frame = encode_frame(&entry, None).unwrap();
        let (decoded, _) = decode_frame(&frame, None).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_roundtrip_encrypted() {
        let cipher = AesGcmCipher::new(&[3u8; 32]);
        let entry = sample_entry();
        let frame = encode_frame(&entry, Some(&cipher)).unwrap();
        let (decoded, consumed) = decode_frame(&frame, Some(&cipher)).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(consumed, frame.len());

        // Length field counts ciphertext bytes.
        let len = u32::from_le_bytes(frame[0..4].try_into().unwrap()) as usize;
        assert_eq!(frame.len(), 4 + len + 4);

        // Plaintext decode of an encrypted frame fails.
        assert!(decode_frame(&frame, None).is_err());
    }

    #[test]
    fn test_bit_flip_detected() {
        let entry = sample_entry();
        let frame = encode_frame(&entry, None).unwrap();
        for i in 4..frame.len() {
            let mut corrupted = frame.clone();
            corrupted[i] ^= 0xFF;
            let err = decode_frame(&corrupted, None).unwrap_err();
            assert!(
                matches!(err, FrameError::ChecksumMismatch { .. }),
                "flip at {} gave {:?}",
                i,
                err
            );
        }
    }

    #[test]
    fn test_truncation_is_incomplete() {
        let frame = encode_frame(&sample_entry(), None).unwrap();
        for cut in [0, 3, 10, frame.len() - 1] {
            assert_eq!(
                decode_frame(&frame[..cut], None).unwrap_err(),
                FrameError::Incomplete
            );
        }
    }

    #[test]
    fn test_bad_length_rejected() {
        let mut frame = vec![0u8; 12];
        frame[0..4].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            decode_frame(&frame, None),
            Err(FrameError::BadLength(0))
        ));

        frame[0..4].copy_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_le_bytes());
        assert!(matches!(
            decode_frame(&frame, None),
            Err(FrameError::BadLength(_))
        ));
    }

    #[test]
    fn test_frames_in_sequence() {
        let entries = vec![
            sample_entry(),
            WalEntry::delete("tmss-01arz3ndektsv4rrffq69g5fav", 1),
            sample_entry(),
        ];
        let mut buf = Vec::new();
        for e in &entries {
            buf.extend_from_slice(&encode_frame(e, None).unwrap());
        }

        let mut offset = 0;
        for expected in &entries {
            let (entry, consumed) = decode_frame(&buf[offset..], None).unwrap();
            assert_eq!(&entry, expected);
            offset += consumed;
        }
        assert_eq!(offset, buf.len());
    }

    #[test]
    fn test_frame_len_matches_decode() {
        let frame = encode_frame(&sample_entry(), None).unwrap();
        assert_eq!(frame_len(&frame).unwrap(), frame.len());
    }

    proptest::proptest! {
        #[test]
        fn prop_arbitrary_bytes_never_panic(
            bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..512)
        ) {
            let _ = decode_frame(&bytes, None);
            let _ = frame_len(&bytes);
        }

        #[test]
        fn prop_roundtrip_arbitrary_fields(
            user in "[a-zA-Z0-9._-]{1,64}",
            key in "[a-z]{1,16}",
            value in "[ -~]{0,64}",
            ts in 0u64..=u64::MAX / 2,
        ) {
            let mut s = Session::new(user);
            let (_, hash) = generate_token();
            s.token_hash = hash;
            s.data.insert(key, value);
            let entry = WalEntry::update(&s, ts);

            let frame = encode_frame(&entry, None).unwrap();
            let (decoded, consumed) = decode_frame(&frame, None).unwrap();
            proptest::prop_assert_eq!(decoded, entry);
            proptest::prop_assert_eq!(consumed, frame.len());
        }
    }
}
