//! Node identity keys.
//!
//! A node carries one 32-byte secret scalar from which its public
//! identities are derived: the Edwards public key used by the signature
//! engine (unclamped scalar-base multiplication), its X25519 image that
//! names the node on the message bus, and the clamped sealed-channel
//! key that client payload envelopes are encrypted to.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::base32z;
use crate::encoding;

/// Byte length of keys and scalars.
pub const KEY_LENGTH: usize = 32;

/// Errors that can occur when constructing key material.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The textual form was not valid hex or base32z.
    #[error("key data is invalid: {0}")]
    BadEncoding(String),
    /// The private scalar is outside the canonical range.
    #[error("private key scalar is not canonical")]
    NonCanonicalScalar,
    /// A supplied public key does not match the derived one.
    #[error("public key does not match private key derivation")]
    PublicKeyMismatch,
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// A 32-byte compressed curve point identifying a peer or client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LENGTH]);

impl PublicKey {
    /// Wraps raw bytes as a public key.
    ///
    /// Curve validity is not checked here; signature verification
    /// rejects keys that do not decode to a point.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Parses a 64-character hex public key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::BadEncoding`] on malformed input.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        encoding::hex_to_array32(s)
            .map(Self)
            .map_err(|e| KeyError::BadEncoding(e.to_string()))
    }

    /// Parses a 52-character base32z public key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::BadEncoding`] on malformed input or wrong
    /// length.
    pub fn from_base32z(s: &str) -> Result<Self, KeyError> {
        base32z::decode_pubkey(s)
            .map(Self)
            .map_err(|e| KeyError::BadEncoding(e.to_string()))
    }

    /// Renders the key as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        encoding::to_hex(&self.0)
    }

    /// Renders the key in the client-facing base32z form (52 chars).
    #[must_use]
    pub fn to_base32z(&self) -> String {
        base32z::encode(&self.0)
    }
}

// ---------------------------------------------------------------------------
// PrivateKey
// ---------------------------------------------------------------------------

/// A canonical secret scalar. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; KEY_LENGTH]);

impl PrivateKey {
    /// Validates and wraps a raw 32-byte scalar.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::NonCanonicalScalar`] if the bytes are not a
    /// canonical scalar mod the group order.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Result<Self, KeyError> {
        if Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes)).is_none() {
            return Err(KeyError::NonCanonicalScalar);
        }
        Ok(Self(bytes))
    }

    /// Parses a 64-character hex secret scalar.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::BadEncoding`] on malformed hex or
    /// [`KeyError::NonCanonicalScalar`] on an out-of-range scalar.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = encoding::hex_to_array32(s)
            .map_err(|e| KeyError::BadEncoding(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    /// Returns the raw scalar bytes.
    #[must_use]
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Returns the secret as a curve scalar.
    #[must_use]
    pub(crate) fn scalar(&self) -> Scalar {
        // Canonical range was checked at construction.
        Scalar::from_bytes_mod_order(self.0)
    }

    /// Copies the scalar bytes for the sealed-channel keypair.
    #[must_use]
    pub fn to_sealed_secret(&self) -> [u8; KEY_LENGTH] {
        self.0
    }
}

// PrivateKey and KeyPair intentionally implement neither Clone nor Debug,
// so secret scalars cannot leak through logs or stray copies.

// ---------------------------------------------------------------------------
// Derivations
// ---------------------------------------------------------------------------

/// Derives the Edwards public key `A = a·B` (no clamping).
#[must_use]
pub fn derive_public_key(private_key: &PrivateKey) -> PublicKey {
    let point = EdwardsPoint::mul_base(&private_key.scalar());
    PublicKey(point.compress().to_bytes())
}

/// Derives the X25519 public key from the same secret scalar.
///
/// This is the birational image of the Edwards public key (the standard
/// Ed25519-to-X25519 public key conversion). It is the identity peers
/// use on the message bus and the key the peer directory indexes by,
/// and anyone can recompute it from the Edwards key alone; see
/// [`x25519_from_edwards`].
#[must_use]
pub fn derive_public_key_x25519(private_key: &PrivateKey) -> [u8; KEY_LENGTH] {
    EdwardsPoint::mul_base(&private_key.scalar())
        .to_montgomery()
        .to_bytes()
}

/// Converts an Edwards public key to its X25519 (Montgomery) form.
///
/// This is how a peer's bus identity is obtained: it is a pure function
/// of the key that signed, so a remote cannot claim someone else's
/// X25519 identity. Returns `None` if the bytes are not a curve point.
#[must_use]
pub fn x25519_from_edwards(public_key: &PublicKey) -> Option<[u8; KEY_LENGTH]> {
    CompressedEdwardsY(public_key.0)
        .decompress()
        .map(|point| point.to_montgomery().to_bytes())
}

/// Derives the public half of the sealed-channel keypair.
///
/// The sealed payload channel runs over the RFC 7748 clamped scalar,
/// so its public key differs from the bus identity; clients learn it
/// out-of-band alongside the node's endpoint.
#[must_use]
pub fn derive_sealed_public_key(private_key: &PrivateKey) -> [u8; KEY_LENGTH] {
    let secret = x25519_dalek::StaticSecret::from(private_key.0);
    *x25519_dalek::PublicKey::from(&secret).as_bytes()
}

// ---------------------------------------------------------------------------
// KeyPair
// ---------------------------------------------------------------------------

/// A node's long-term keypair, loaded once at startup.
pub struct KeyPair {
    /// The Edwards public key.
    pub public_key: PublicKey,
    private_key: PrivateKey,
}

impl KeyPair {
    /// Builds a keypair from an existing private/public pair, checking
    /// the derivation invariant.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::PublicKeyMismatch`] if `public_key` is not
    /// the scalar-base multiple of `private_key`.
    pub fn new(private_key: PrivateKey, public_key: PublicKey) -> Result<Self, KeyError> {
        if derive_public_key(&private_key) != public_key {
            return Err(KeyError::PublicKeyMismatch);
        }
        Ok(Self {
            public_key,
            private_key,
        })
    }

    /// Builds a keypair by deriving the public key from `private_key`.
    #[must_use]
    pub fn from_private(private_key: PrivateKey) -> Self {
        let public_key = derive_public_key(&private_key);
        Self {
            public_key,
            private_key,
        }
    }

    /// Parses a keypair from a 64-character hex secret scalar.
    ///
    /// # Errors
    ///
    /// Propagates [`PrivateKey::from_hex`] failures.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        Ok(Self::from_private(PrivateKey::from_hex(s)?))
    }

    /// Generates a fresh random keypair from OS entropy.
    #[must_use]
    pub fn generate() -> Self {
        let scalar = Scalar::random(&mut OsRng);
        let private_key = PrivateKey(scalar.to_bytes());
        Self::from_private(private_key)
    }

    /// Returns the private half.
    #[must_use]
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Derives the node's X25519 public identity.
    #[must_use]
    pub fn public_key_x25519(&self) -> [u8; KEY_LENGTH] {
        derive_public_key_x25519(&self.private_key)
    }

    /// Derives the public half of the node's sealed-channel keypair.
    #[must_use]
    pub fn sealed_public_key(&self) -> [u8; KEY_LENGTH] {
        derive_sealed_public_key(&self.private_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_satisfies_derivation_invariant() {
        let kp = KeyPair::generate();
        assert_eq!(derive_public_key(&kp.private_key), kp.public_key);
    }

    #[test]
    fn from_hex_round_trips() {
        let kp = KeyPair::generate();
        let hex = encoding::to_hex(kp.private_key().as_bytes());
        let restored = KeyPair::from_hex(&hex).unwrap();
        assert_eq!(restored.public_key, kp.public_key);
    }

    #[test]
    fn non_canonical_scalar_rejected() {
        // The group order minus nothing: all-0xFF is far above the order.
        assert!(matches!(
            PrivateKey::from_bytes([0xFF; 32]),
            Err(KeyError::NonCanonicalScalar)
        ));
    }

    #[test]
    fn mismatched_public_key_rejected() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let private = PrivateKey::from_bytes(*kp.private_key().as_bytes()).unwrap();
        assert!(matches!(
            KeyPair::new(private, other.public_key),
            Err(KeyError::PublicKeyMismatch)
        ));
    }

    #[test]
    fn base32z_form_is_52_chars() {
        let kp = KeyPair::generate();
        let text = kp.public_key.to_base32z();
        assert_eq!(text.len(), 52);
        assert_eq!(PublicKey::from_base32z(&text).unwrap(), kp.public_key);
    }

    #[test]
    fn x25519_identity_matches_edwards_conversion() {
        // The bus identity anyone derives from the Edwards key must be
        // the one the node derives from its own secret.
        let kp = KeyPair::generate();
        assert_eq!(
            x25519_from_edwards(&kp.public_key),
            Some(kp.public_key_x25519())
        );
    }

    #[test]
    fn x25519_from_edwards_rejects_non_points() {
        // Scan for an encoding that is not a curve point.
        let mut bytes = [0u8; 32];
        loop {
            if CompressedEdwardsY(bytes).decompress().is_none() {
                break;
            }
            bytes[0] = bytes[0].wrapping_add(1);
        }
        assert_eq!(x25519_from_edwards(&PublicKey::from_bytes(bytes)), None);
    }

    #[test]
    fn sealed_key_differs_from_bus_identity() {
        // The sealed channel clamps its scalar; the two derivations are
        // distinct keys with distinct jobs.
        let kp = KeyPair::generate();
        assert_eq!(kp.sealed_public_key(), kp.sealed_public_key());
        assert_ne!(kp.sealed_public_key(), kp.public_key_x25519());
    }

    #[test]
    fn bad_hex_is_rejected() {
        assert!(PublicKey::from_hex("zz").is_err());
        assert!(PrivateKey::from_hex("abcd").is_err());
    }
}
