//! base32z (zbase32) encoding and decoding.
//!
//! Client-facing public keys travel as base32z text: the lowercase,
//! human-distinguishable alphabet `ybndrfg8…` with MSB-first 5-bit
//! groups. A 32-byte key encodes to exactly 52 characters.

use thiserror::Error;

/// The zbase32 alphabet, indexed by 5-bit group value.
const ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

/// Reverse lookup table: ASCII byte to 5-bit value, -1 for invalid.
const REVERSE: [i8; 256] = {
    let mut table = [-1i8; 256];
    let mut i = 0;
    while i < 32 {
        table[ALPHABET[i] as usize] = i as i8;
        i += 1;
    }
    table
};

/// Number of base32z characters in an encoded 32-byte public key.
pub const PUBKEY_B32Z_LENGTH: usize = 52;

/// Errors that can occur when decoding base32z text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Base32zError {
    /// The input contains a character outside the zbase32 alphabet.
    #[error("invalid base32z character {0:?}")]
    InvalidCharacter(char),
    /// The decoded output is not the expected length.
    #[error("expected {expected} decoded bytes, got {actual}")]
    WrongLength {
        /// Expected byte count.
        expected: usize,
        /// Actual byte count produced.
        actual: usize,
    },
}

/// Returns `true` if every character of `s` is in the zbase32 alphabet.
///
/// # Examples
///
/// ```
/// assert!(haven_common::base32z::is_base32z("ybndrfg8"));
/// assert!(!haven_common::base32z::is_base32z("YBND"));
/// ```
#[must_use]
pub fn is_base32z(s: &str) -> bool {
    s.bytes().all(|b| REVERSE[b as usize] >= 0)
}

/// Encodes raw bytes as base32z text.
///
/// Bits are consumed most-significant first; a final group shorter than
/// 5 bits is zero-padded on the right.
///
/// # Examples
///
/// ```
/// assert_eq!(haven_common::base32z::encode(&[0xFF]), "9h");
/// ```
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u16 = 0;
    let mut bits = 0u32;
    for &b in bytes {
        buffer = (buffer << 8) | u16::from(b);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[usize::from((buffer >> bits) & 0x1F)] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[usize::from((buffer << (5 - bits)) & 0x1F)] as char);
    }
    out
}

/// Decodes base32z text to raw bytes.
///
/// Trailing bits that do not fill a whole byte are discarded, matching
/// the wire behaviour of the fleet's reference codec.
///
/// # Errors
///
/// Returns [`Base32zError::InvalidCharacter`] on input outside the
/// alphabet.
pub fn decode(s: &str) -> Result<Vec<u8>, Base32zError> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u16 = 0;
    let mut bits = 0u32;
    for ch in s.chars() {
        let v = if ch.is_ascii() {
            REVERSE[ch as usize]
        } else {
            -1
        };
        if v < 0 {
            return Err(Base32zError::InvalidCharacter(ch));
        }
        buffer = (buffer << 5) | v as u16;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    Ok(out)
}

/// Decodes a 52-character base32z string to a 32-byte key.
///
/// # Errors
///
/// Returns [`Base32zError::WrongLength`] if the input is not exactly
/// [`PUBKEY_B32Z_LENGTH`] characters, or
/// [`Base32zError::InvalidCharacter`] on a bad character.
pub fn decode_pubkey(s: &str) -> Result<[u8; 32], Base32zError> {
    if s.len() != PUBKEY_B32Z_LENGTH {
        return Err(Base32zError::WrongLength {
            expected: PUBKEY_B32Z_LENGTH,
            actual: s.len(),
        });
    }
    let bytes = decode(s)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| Base32zError::WrongLength {
        expected: 32,
        actual: len,
    })
}
