//! Binary codec for wire messages and replay records.
//!
//! Centralizes the bincode configuration so every message and record in the
//! crate is encoded the same, deterministic way. Fixed-size integer encoding
//! keeps message layouts stable across platforms, which matters because
//! replay files and consistency checks both assume byte-for-byte
//! reproducibility.
//!
//! P2P packets additionally carry a 16-byte sender peer-id prefix ahead of
//! the encoded body; [`encode_prefixed`] and [`split_sender`] handle that
//! framing.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

use crate::error::LockstepError;
use crate::PeerId;

// Fixed-int encoding: deterministic sizes, no varint surprises in replays.
fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Errors that can occur during encoding or decoding.
#[derive(Debug)]
pub enum CodecError {
    /// The encoding operation failed.
    EncodeError(String),
    /// The decoding operation failed.
    DecodeError(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodeError(msg) => write!(f, "encoding failed: {msg}"),
            Self::DecodeError(msg) => write!(f, "decoding failed: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes a value into a new `Vec<u8>`.
pub fn encode<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, config())
        .map_err(|e| CodecError::EncodeError(e.to_string()))
}

/// Encodes a value by appending to an existing buffer, returning the number
/// of bytes written. Used to lay a record body directly behind its header.
pub fn encode_append<T: Serialize>(value: &T, buffer: &mut Vec<u8>) -> CodecResult<usize> {
    let start_len = buffer.len();
    let encoded = encode(value)?;
    buffer.extend_from_slice(&encoded);
    Ok(buffer.len() - start_len)
}

/// Decodes a value from a byte slice, returning the value and the number of
/// bytes consumed.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<(T, usize)> {
    bincode::serde::decode_from_slice(bytes, config())
        .map_err(|e| CodecError::DecodeError(e.to_string()))
}

/// Decodes a value from a byte slice, ignoring the bytes consumed.
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    decode(bytes).map(|(value, _)| value)
}

/// Encodes a P2P message body behind the 16-byte sender prefix.
pub fn encode_prefixed<T: Serialize>(sender: &PeerId, value: &T) -> CodecResult<Vec<u8>> {
    let mut payload = Vec::with_capacity(PeerId::LENGTH + 64);
    payload.extend_from_slice(sender.as_bytes());
    encode_append(value, &mut payload)?;
    Ok(payload)
}

/// Splits an inbound P2P packet into its sender peer id and message body.
pub fn split_sender(payload: &[u8]) -> Result<(PeerId, &[u8]), LockstepError> {
    let sender = PeerId::try_parse(payload).ok_or(LockstepError::TruncatedPacket {
        needed: PeerId::LENGTH,
        got: payload.len(),
    })?;
    Ok((sender, &payload[PeerId::LENGTH..]))
}

// #########
// # TESTS #
// #########

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod codec_tests {
    use super::*;

    #[test]
    fn roundtrip_primitive() {
        let original: u32 = 12_345;
        let bytes = encode(&original).unwrap();
        let (decoded, consumed): (u32, _) = decode(&bytes).unwrap();
        assert_eq!(original, decoded);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn encoding_is_deterministic() {
        let value = (7u8, 3.5f64, vec![1u8, 2, 3]);
        assert_eq!(encode(&value).unwrap(), encode(&value).unwrap());
    }

    #[test]
    fn encode_append_concatenates() {
        let mut buffer = Vec::new();
        let first = encode_append(&1u32, &mut buffer).unwrap();
        let second = encode_append(&2u64, &mut buffer).unwrap();
        assert_eq!(buffer.len(), first + second);

        // Both values decode back in sequence.
        let (a, consumed): (u32, _) = decode(&buffer).unwrap();
        let (b, _): (u64, _) = decode(&buffer[consumed..]).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn prefixed_roundtrip() {
        let sender = PeerId::from_bytes([3; 16]);
        let payload = encode_prefixed(&sender, &99u32).unwrap();

        let (parsed, body) = split_sender(&payload).unwrap();
        assert_eq!(parsed, sender);
        let value: u32 = decode_value(body).unwrap();
        assert_eq!(value, 99);
    }

    #[test]
    fn split_sender_rejects_short_packet() {
        let err = split_sender(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            LockstepError::TruncatedPacket { needed: 16, got: 3 }
        ));
    }

    #[test]
    fn decode_invalid_data_fails() {
        let result: CodecResult<(String, _)> = decode(&[0xFF; 2]);
        assert!(result.is_err());
    }
}
