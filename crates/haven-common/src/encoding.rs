//! base64 and hex text codecs.
//!
//! Wraps the `base64` and `hex` crates with the conventions used on the
//! wire: standard-alphabet base64 accepted with or without trailing
//! padding, lowercase hex output.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use thiserror::Error;

/// Errors that can occur when decoding wire text.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The input is not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The input is not valid hex.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    /// The decoded bytes are not the expected length.
    #[error("expected {expected} decoded bytes, got {actual}")]
    WrongLength {
        /// Expected byte count.
        expected: usize,
        /// Actual byte count produced.
        actual: usize,
    },
}

/// Encodes bytes as padded standard-alphabet base64.
///
/// # Examples
///
/// ```
/// assert_eq!(haven_common::encoding::to_base64(b"hi"), "aGk=");
/// ```
#[must_use]
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes standard-alphabet base64, accepting padded or unpadded input.
///
/// # Errors
///
/// Returns [`EncodingError::Base64`] on malformed input.
pub fn from_base64(s: &str) -> Result<Vec<u8>, EncodingError> {
    Ok(STANDARD_NO_PAD.decode(s.trim_end_matches('='))?)
}

/// Encodes bytes as lowercase hex.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decodes a hex string to raw bytes.
///
/// # Errors
///
/// Returns [`EncodingError::Hex`] on malformed input.
pub fn from_hex(s: &str) -> Result<Vec<u8>, EncodingError> {
    Ok(hex::decode(s)?)
}

/// Decodes a 64-character hex string to a 32-byte array.
///
/// # Errors
///
/// Returns [`EncodingError::WrongLength`] if the input does not decode
/// to exactly 32 bytes, or [`EncodingError::Hex`] on a bad digit.
pub fn hex_to_array32(s: &str) -> Result<[u8; 32], EncodingError> {
    let bytes = from_hex(s)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| EncodingError::WrongLength {
        expected: 32,
        actual: len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip() {
        let data = [0xABu8; 17];
        let encoded = to_base64(&data);
        assert_eq!(from_base64(&encoded).unwrap(), data);
    }

    #[test]
    fn base64_accepts_unpadded() {
        assert_eq!(from_base64("aGk").unwrap(), b"hi");
        assert_eq!(from_base64("aGk=").unwrap(), b"hi");
    }

    #[test]
    fn base64_rejects_garbage() {
        assert!(from_base64("not base64!").is_err());
    }

    #[test]
    fn hex_round_trip() {
        let data = [0x0Fu8, 0xA0, 0xFF];
        assert_eq!(to_hex(&data), "0fa0ff");
        assert_eq!(from_hex("0fa0ff").unwrap(), data);
    }

    #[test]
    fn hex_to_array32_enforces_length() {
        let ok = hex_to_array32(&"ab".repeat(32)).unwrap();
        assert_eq!(ok, [0xAB; 32]);
        assert!(matches!(
            hex_to_array32("abcd"),
            Err(EncodingError::WrongLength { actual: 2, .. })
        ));
    }
}
