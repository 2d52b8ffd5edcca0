//! Hash primitives.
//!
//! The node signs over 32-byte Blake2b digests ("prefix hashes") and the
//! proof-of-work admission check runs over SHA-512.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use sha2::Sha512;

/// A 32-byte generic-hash digest.
pub type Hash = [u8; 32];

type Blake2b256 = Blake2b<U32>;

/// Computes the 32-byte Blake2b digest of `data`.
///
/// This is the prefix hash fed into the signature engine; callers hash,
/// the signer does not.
///
/// # Examples
///
/// ```
/// let digest = haven_common::hash::hash_data(b"abc");
/// assert_ne!(digest, [0u8; 32]);
/// ```
#[must_use]
pub fn hash_data(data: &[u8]) -> Hash {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes the SHA-512 digest of `data`.
#[must_use]
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_data_is_deterministic() {
        assert_eq!(hash_data(b"payload"), hash_data(b"payload"));
        assert_ne!(hash_data(b"payload"), hash_data(b"payloae"));
    }

    #[test]
    fn hash_data_empty_input() {
        // Blake2b-256 of the empty string.
        assert_eq!(
            hex::encode(hash_data(b"")),
            "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
        );
    }

    #[test]
    fn sha512_known_vector() {
        // SHA-512("abc"), FIPS 180-2 appendix C.
        assert_eq!(
            hex::encode(sha512(b"abc")),
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
    }
}
