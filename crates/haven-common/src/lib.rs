//! Common codecs, crypto primitives and wire frames shared across the
//! haven storage node stack.
//!
//! This crate provides:
//! - base32z and base64/hex text codecs ([`base32z`], [`encoding`])
//! - Blake2b/SHA-512 hash primitives ([`hash`])
//! - node identity keys and derivations ([`keys`])
//! - the detached signature engine ([`signature`])
//! - the proof-of-work admission engine ([`pow`])
//! - message-bus frame serialization ([`frame`])
//! - sealed payload envelopes ([`sealed`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod base32z;
pub mod encoding;
pub mod frame;
pub mod hash;
pub mod keys;
pub mod pow;
pub mod sealed;
pub mod signature;
pub mod util;

pub use hash::Hash;
pub use keys::{KeyPair, PublicKey};
pub use pow::PowDifficulty;
