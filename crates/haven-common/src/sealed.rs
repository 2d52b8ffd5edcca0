//! Stateless sealed payload envelopes.
//!
//! Onion-routed client traffic reaches the node as a pair of RPC parts:
//! an ephemeral X25519 key and a ciphertext sealed to the node's
//! published sealed-channel key. The ephemeral key doubles as the HPKE
//! encapsulated key, so opening a payload needs no session state.
//!
//! Ciphersuite: X25519-HKDF-SHA256 / HKDF-SHA256 / ChaCha20-Poly1305.

use hpke::aead::ChaCha20Poly1305;
use hpke::kdf::HkdfSha256;
use hpke::kem::X25519HkdfSha256;
use hpke::{Deserializable, Kem as KemTrait, OpModeR, OpModeS, Serializable};
use rand::rngs::OsRng;
use thiserror::Error;

type Kem = X25519HkdfSha256;

/// Size of the ephemeral (encapsulated) key.
pub const EPHEMERAL_KEY_LENGTH: usize = 32;

/// AEAD tag length; the minimum possible ciphertext size.
const TAG_LENGTH: usize = 16;

/// Info string binding envelopes to this protocol revision.
const INFO: &[u8] = b"haven-onion-v1";

/// Empty AAD; all context lives in the info string.
const AAD: &[u8] = b"";

/// Errors from sealing or opening envelopes.
#[derive(Debug, Error)]
pub enum SealError {
    /// HPKE operation failed (bad key, corrupted ciphertext).
    #[error("hpke: {0}")]
    Hpke(#[from] hpke::HpkeError),
    /// Envelope parts have impossible sizes.
    #[error("malformed envelope: {0}")]
    Malformed(&'static str),
}

/// A sealed payload: the two parts that travel as RPC arguments.
#[derive(Debug, Clone)]
pub struct SealedEnvelope {
    /// The sender's ephemeral X25519 public key (HPKE encapsulated key).
    pub ephemeral_key: [u8; EPHEMERAL_KEY_LENGTH],
    /// The ChaCha20-Poly1305 ciphertext with trailing tag.
    pub ciphertext: Vec<u8>,
}

/// Seals `plaintext` to a recipient's X25519 public key.
///
/// # Errors
///
/// Returns [`SealError::Hpke`] if the recipient key is invalid.
pub fn seal(recipient_x25519: &[u8; 32], plaintext: &[u8]) -> Result<SealedEnvelope, SealError> {
    let recipient_pk = <Kem as KemTrait>::PublicKey::from_bytes(recipient_x25519)?;
    let (encapped_key, ciphertext) = hpke::single_shot_seal::<ChaCha20Poly1305, HkdfSha256, Kem, _>(
        &OpModeS::Base,
        &recipient_pk,
        INFO,
        plaintext,
        AAD,
        &mut OsRng,
    )?;
    let mut ephemeral_key = [0u8; EPHEMERAL_KEY_LENGTH];
    ephemeral_key.copy_from_slice(&encapped_key.to_bytes());
    Ok(SealedEnvelope {
        ephemeral_key,
        ciphertext,
    })
}

/// Opens a sealed payload with the recipient's X25519 secret.
///
/// # Errors
///
/// Returns [`SealError::Malformed`] on impossible part sizes and
/// [`SealError::Hpke`] if authentication or decryption fails.
pub fn open(
    recipient_secret: &[u8; 32],
    ephemeral_key: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, SealError> {
    if ephemeral_key.len() != EPHEMERAL_KEY_LENGTH {
        return Err(SealError::Malformed("ephemeral key must be 32 bytes"));
    }
    if ciphertext.len() < TAG_LENGTH {
        return Err(SealError::Malformed("ciphertext shorter than AEAD tag"));
    }
    let encapped_key = <Kem as KemTrait>::EncappedKey::from_bytes(ephemeral_key)?;
    let recipient_sk = <Kem as KemTrait>::PrivateKey::from_bytes(recipient_secret)?;
    Ok(hpke::single_shot_open::<ChaCha20Poly1305, HkdfSha256, Kem>(
        &OpModeR::Base,
        &recipient_sk,
        &encapped_key,
        INFO,
        ciphertext,
        AAD,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    fn node_identity() -> (KeyPair, [u8; 32], [u8; 32]) {
        let kp = KeyPair::generate();
        let x_pub = kp.sealed_public_key();
        let x_sec = kp.private_key().to_sealed_secret();
        (kp, x_pub, x_sec)
    }

    #[test]
    fn seal_open_round_trip() {
        let (_kp, x_pub, x_sec) = node_identity();
        let envelope = seal(&x_pub, b"inner onion layer").unwrap();
        let opened = open(&x_sec, &envelope.ephemeral_key, &envelope.ciphertext).unwrap();
        assert_eq!(opened, b"inner onion layer");
    }

    #[test]
    fn wrong_recipient_fails() {
        let (_kp, x_pub, _x_sec) = node_identity();
        let (_other, _other_pub, other_sec) = node_identity();
        let envelope = seal(&x_pub, b"secret").unwrap();
        assert!(open(&other_sec, &envelope.ephemeral_key, &envelope.ciphertext).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let (_kp, x_pub, x_sec) = node_identity();
        let mut envelope = seal(&x_pub, b"secret").unwrap();
        let last = envelope.ciphertext.len() - 1;
        envelope.ciphertext[last] ^= 0xFF;
        assert!(open(&x_sec, &envelope.ephemeral_key, &envelope.ciphertext).is_err());
    }

    #[test]
    fn short_parts_rejected() {
        let (_kp, _x_pub, x_sec) = node_identity();
        assert!(matches!(
            open(&x_sec, &[0u8; 16], &[0u8; 32]),
            Err(SealError::Malformed(_))
        ));
        assert!(matches!(
            open(&x_sec, &[0u8; 32], &[0u8; 4]),
            Err(SealError::Malformed(_))
        ));
    }

    #[test]
    fn empty_plaintext_round_trip() {
        let (_kp, x_pub, x_sec) = node_identity();
        let envelope = seal(&x_pub, b"").unwrap();
        assert!(open(&x_sec, &envelope.ephemeral_key, &envelope.ciphertext)
            .unwrap()
            .is_empty());
    }
}
