//! Detached signatures over 32-byte prefix hashes.
//!
//! The scheme is EdDSA-shaped but uses a randomized commitment rather
//! than deterministic nonce derivation, and a Keccak-256 hash-to-scalar:
//!
//! ```text
//! R = k·B            (k random, k[7] != 0)
//! c = H(h ‖ A ‖ R)   (Keccak-256 reduced mod the group order)
//! r = k − c·a
//! ```
//!
//! Verification recomputes `R' = c·A + r·B` and accepts iff
//! `H(h ‖ A ‖ R') == c`. The byte-level construction matches the fleet's
//! deployed signer exactly; do not swap the hash or drop the `k[7]`
//! filter without coordinating a fleet-wide change.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256};

use crate::base32z;
use crate::encoding;
use crate::hash::Hash;
use crate::keys::{derive_public_key, KeyPair, PublicKey};

/// Byte length of a serialized signature (`c ‖ r`).
pub const SIGNATURE_LENGTH: usize = 64;

/// Canonical encoding of the neutral element; a verified commitment
/// equal to this is always rejected.
const INFINITY: [u8; 32] = [
    1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0,
];

/// A detached signature: two 32-byte scalars.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    /// The challenge scalar.
    pub c: [u8; 32],
    /// The response scalar.
    pub r: [u8; 32],
}

impl Signature {
    /// Serializes to the 64-byte wire form `c ‖ r`.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        let mut out = [0u8; SIGNATURE_LENGTH];
        out[..32].copy_from_slice(&self.c);
        out[32..].copy_from_slice(&self.r);
        out
    }

    /// Deserializes from the 64-byte wire form.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; SIGNATURE_LENGTH]) -> Self {
        let mut c = [0u8; 32];
        let mut r = [0u8; 32];
        c.copy_from_slice(&bytes[..32]);
        r.copy_from_slice(&bytes[32..]);
        Self { c, r }
    }

    /// Renders the signature as padded base64 (88 characters).
    #[must_use]
    pub fn to_base64(&self) -> String {
        encoding::to_base64(&self.to_bytes())
    }
}

/// Concatenates three 32-byte blocks and reduces the Keccak-256 digest
/// mod the group order.
fn hash_to_scalar(prefix_hash: &Hash, key: &[u8; 32], commitment: &[u8; 32]) -> Scalar {
    let mut buf = [0u8; 96];
    buf[..32].copy_from_slice(prefix_hash);
    buf[32..64].copy_from_slice(key);
    buf[64..].copy_from_slice(commitment);
    let digest: [u8; 32] = Keccak256::digest(buf).into();
    Scalar::from_bytes_mod_order(digest)
}

/// Signs a 32-byte prefix hash with the node's long-term keypair.
///
/// Loops over fresh randomness until the commitment scalar has a
/// nonzero eighth byte and both signature scalars are nonzero; each
/// rejection is vanishingly rare, so the loop is effectively bounded.
#[must_use]
pub fn generate_signature(prefix_hash: &Hash, key_pair: &KeyPair) -> Signature {
    debug_assert_eq!(derive_public_key(key_pair.private_key()), key_pair.public_key);
    let a = key_pair.private_key().scalar();
    loop {
        let k = Scalar::random(&mut OsRng);
        // Small-value rejection kept for wire compatibility with the
        // deployed fleet; entropy comes from the CSPRNG above.
        if k.to_bytes()[7] == 0 {
            continue;
        }
        let commitment = EdwardsPoint::mul_base(&k).compress().to_bytes();
        let c = hash_to_scalar(prefix_hash, key_pair.public_key.as_bytes(), &commitment);
        if c == Scalar::ZERO {
            continue;
        }
        let r = k - c * a;
        if r == Scalar::ZERO {
            continue;
        }
        return Signature {
            c: c.to_bytes(),
            r: r.to_bytes(),
        };
    }
}

/// Verifies a signature over a 32-byte prefix hash.
///
/// Rejects non-point public keys, non-canonical or zero `c`, a
/// non-canonical `r`, and an identity-element commitment. All failure
/// modes report uniformly as `false`.
#[must_use]
pub fn check_signature(sig: &Signature, prefix_hash: &Hash, public_key: &PublicKey) -> bool {
    let Some(point) = CompressedEdwardsY(*public_key.as_bytes()).decompress() else {
        return false;
    };
    let Some(c) = Option::<Scalar>::from(Scalar::from_canonical_bytes(sig.c)) else {
        return false;
    };
    let Some(r) = Option::<Scalar>::from(Scalar::from_canonical_bytes(sig.r)) else {
        return false;
    };
    if c == Scalar::ZERO {
        return false;
    }
    let commitment = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, &point, &r)
        .compress()
        .to_bytes();
    if commitment == INFINITY {
        return false;
    }
    let expected = hash_to_scalar(prefix_hash, public_key.as_bytes(), &commitment);
    expected - c == Scalar::ZERO
}

/// Verifies the textual wire form of a signature.
///
/// The base64 signature must be exactly 86 characters unpadded or 88
/// with trailing padding; the base32z public key must be exactly 52
/// characters. Any encoding violation reports as `false`.
#[must_use]
pub fn check_signature_b64(signature_b64: &str, prefix_hash: &Hash, pubkey_b32z: &str) -> bool {
    // 64 raw bytes -> 86 base64 chars, 88 with padding.
    let padded_ok = signature_b64.len() == 88 && signature_b64.as_bytes()[86] == b'=';
    if signature_b64.len() != 86 && !padded_ok {
        return false;
    }
    let Ok(raw) = encoding::from_base64(signature_b64) else {
        return false;
    };
    let Ok(raw) = <[u8; SIGNATURE_LENGTH]>::try_from(raw) else {
        return false;
    };
    let sig = Signature::from_bytes(&raw);

    if pubkey_b32z.len() != base32z::PUBKEY_B32Z_LENGTH || !base32z::is_base32z(pubkey_b32z) {
        return false;
    }
    let Ok(public_key) = PublicKey::from_base32z(pubkey_b32z) else {
        return false;
    };

    check_signature(&sig, prefix_hash, &public_key)
}
