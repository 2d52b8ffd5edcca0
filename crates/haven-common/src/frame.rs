//! Message-bus frame serialization and parsing.
//!
//! Every frame is a type-length-value binary message carried as one
//! WebSocket binary payload. The first byte identifies the frame type.
//! Admission frames (`0xC0`–`0xC3`) establish the peer's identity and
//! capability tier; request/reply frames carry the RPC traffic, with an
//! opaque `reply_tag` as the sole correlator between a request and its
//! (possibly much later) reply.

use thiserror::Error;

use crate::hash::{hash_data, Hash};

/// REQUEST frame type: peer → node, invoke `category.command`.
pub const TYPE_REQUEST: u8 = 0x01;
/// REPLY frame type: response correlated by reply tag.
pub const TYPE_REPLY: u8 = 0x02;
/// CHALLENGE frame type: node → peer, admission challenge.
pub const TYPE_CHALLENGE: u8 = 0xC0;
/// RESPONSE frame type: peer → node, signed admission response.
pub const TYPE_RESPONSE: u8 = 0xC1;
/// ADMITTED frame type: node → peer, admission granted with tier.
pub const TYPE_ADMITTED: u8 = 0xC2;
/// REJECTED frame type: node → peer, admission denied.
pub const TYPE_REJECTED: u8 = 0xC3;

/// Maximum total frame size (10 MiB).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Reason codes sent in REJECTED frames during admission.
pub mod rejection_reason {
    /// Signature verification failed.
    pub const BAD_SIG: u8 = 0x01;
    /// Admission timestamp is outside the tolerance window.
    pub const TIMESTAMP_EXPIRED: u8 = 0x02;
    /// The admission handshake did not complete in time.
    pub const TIMEOUT: u8 = 0x03;
}

/// A parsed message-bus frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Admission challenge from node to connecting peer.
    Challenge {
        /// Random 32-byte challenge token.
        challenge: [u8; 32],
        /// The node's Edwards public key.
        server_pubkey: [u8; 32],
    },
    /// Signed admission response from peer to node.
    ///
    /// Carries only the Edwards key that produced the signature; the
    /// peer's X25519 bus identity is derived from it on the node side,
    /// never taken from the wire.
    Response {
        /// The peer's Edwards public key.
        pubkey: [u8; 32],
        /// Milliseconds since epoch at which the response was signed.
        timestamp_ms: u64,
        /// Detached signature over the admission digest.
        signature: [u8; 64],
    },
    /// Admission granted; carries the assigned capability tier.
    Admitted {
        /// Capability tier byte (see the dispatcher's tier encoding).
        tier: u8,
    },
    /// Admission denied.
    Rejected {
        /// Rejection reason code.
        reason: u8,
    },
    /// RPC request.
    Request {
        /// Opaque correlator echoed in the reply.
        reply_tag: u64,
        /// Command category, ASCII.
        category: String,
        /// Command name, ASCII.
        command: String,
        /// Ordered argument byte-strings.
        parts: Vec<Vec<u8>>,
    },
    /// RPC reply. One part signals success; two parts signal an
    /// application error `(status, message)`.
    Reply {
        /// Correlator copied from the originating request.
        reply_tag: u64,
        /// Ordered reply byte-strings.
        parts: Vec<Vec<u8>>,
    },
}

/// Errors that can occur during frame parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The input byte slice was empty.
    #[error("frame is empty")]
    Empty,
    /// The frame is too short for the declared type.
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Minimum expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// The frame exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: max {max}, got {actual}")]
    Oversize {
        /// Maximum allowed frame size.
        max: usize,
        /// Actual frame size received.
        actual: usize,
    },
    /// A category or command identifier is empty or not ASCII.
    #[error("malformed command identifier")]
    BadCommand,
    /// The first byte does not match any known frame type.
    #[error("unknown frame type {0:#04x}")]
    UnknownType(u8),
}

/// Computes the digest a peer signs during admission, binding the
/// challenge, the signing key and the response timestamp.
#[must_use]
pub fn admission_digest(challenge: &[u8; 32], pubkey: &[u8; 32], timestamp_ms: u64) -> Hash {
    let mut buf = [0u8; 72];
    buf[..32].copy_from_slice(challenge);
    buf[32..64].copy_from_slice(pubkey);
    buf[64..].copy_from_slice(&timestamp_ms.to_be_bytes());
    hash_data(&buf)
}

fn take_array<const N: usize>(data: &[u8], at: usize) -> Result<[u8; N], FrameError> {
    data.get(at..at + N)
        .and_then(|s| s.try_into().ok())
        .ok_or(FrameError::TooShort {
            expected: at + N,
            actual: data.len(),
        })
}

fn write_parts(out: &mut Vec<u8>, parts: &[Vec<u8>]) {
    out.push(parts.len() as u8);
    for part in parts {
        out.extend_from_slice(&(part.len() as u32).to_be_bytes());
        out.extend_from_slice(part);
    }
}

fn read_parts(data: &[u8], mut at: usize) -> Result<Vec<Vec<u8>>, FrameError> {
    let count = *data.get(at).ok_or(FrameError::TooShort {
        expected: at + 1,
        actual: data.len(),
    })?;
    at += 1;
    let mut parts = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let len: [u8; 4] = take_array(data, at)?;
        at += 4;
        let len = u32::from_be_bytes(len) as usize;
        let part = data.get(at..at + len).ok_or(FrameError::TooShort {
            expected: at + len,
            actual: data.len(),
        })?;
        at += len;
        parts.push(part.to_vec());
    }
    Ok(parts)
}

fn read_ident(data: &[u8], at: usize) -> Result<(String, usize), FrameError> {
    let len = usize::from(*data.get(at).ok_or(FrameError::TooShort {
        expected: at + 1,
        actual: data.len(),
    })?);
    let bytes = data.get(at + 1..at + 1 + len).ok_or(FrameError::TooShort {
        expected: at + 1 + len,
        actual: data.len(),
    })?;
    if len == 0 || !bytes.is_ascii() {
        return Err(FrameError::BadCommand);
    }
    Ok((
        String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::BadCommand)?,
        at + 1 + len,
    ))
}

impl Frame {
    /// Creates a `Request` frame.
    #[must_use]
    pub fn request(reply_tag: u64, category: &str, command: &str, parts: Vec<Vec<u8>>) -> Self {
        Self::Request {
            reply_tag,
            category: category.to_owned(),
            command: command.to_owned(),
            parts,
        }
    }

    /// Creates a `Reply` frame.
    #[must_use]
    pub fn reply(reply_tag: u64, parts: Vec<Vec<u8>>) -> Self {
        Self::Reply { reply_tag, parts }
    }

    /// Serializes this frame for transmission.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Self::Challenge {
                challenge,
                server_pubkey,
            } => {
                let mut v = Vec::with_capacity(65);
                v.push(TYPE_CHALLENGE);
                v.extend_from_slice(challenge);
                v.extend_from_slice(server_pubkey);
                v
            }
            Self::Response {
                pubkey,
                timestamp_ms,
                signature,
            } => {
                let mut v = Vec::with_capacity(105);
                v.push(TYPE_RESPONSE);
                v.extend_from_slice(pubkey);
                v.extend_from_slice(&timestamp_ms.to_be_bytes());
                v.extend_from_slice(signature);
                v
            }
            Self::Admitted { tier } => vec![TYPE_ADMITTED, *tier],
            Self::Rejected { reason } => vec![TYPE_REJECTED, *reason],
            Self::Request {
                reply_tag,
                category,
                command,
                parts,
            } => {
                let mut v = Vec::with_capacity(
                    11 + category.len() + command.len()
                        + parts.iter().map(|p| 4 + p.len()).sum::<usize>(),
                );
                v.push(TYPE_REQUEST);
                v.extend_from_slice(&reply_tag.to_be_bytes());
                v.push(category.len() as u8);
                v.extend_from_slice(category.as_bytes());
                v.push(command.len() as u8);
                v.extend_from_slice(command.as_bytes());
                write_parts(&mut v, parts);
                v
            }
            Self::Reply { reply_tag, parts } => {
                let mut v = Vec::with_capacity(
                    10 + parts.iter().map(|p| 4 + p.len()).sum::<usize>(),
                );
                v.push(TYPE_REPLY);
                v.extend_from_slice(&reply_tag.to_be_bytes());
                write_parts(&mut v, parts);
                v
            }
        }
    }

    /// Parses a byte slice into a typed frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the data is empty, oversized, too short
    /// for the declared type, carries a malformed command identifier, or
    /// has an unrecognized type byte.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.is_empty() {
            return Err(FrameError::Empty);
        }
        if data.len() > MAX_FRAME_SIZE {
            return Err(FrameError::Oversize {
                max: MAX_FRAME_SIZE,
                actual: data.len(),
            });
        }
        match data[0] {
            TYPE_CHALLENGE => Ok(Self::Challenge {
                challenge: take_array(data, 1)?,
                server_pubkey: take_array(data, 33)?,
            }),
            TYPE_RESPONSE => Ok(Self::Response {
                pubkey: take_array(data, 1)?,
                timestamp_ms: u64::from_be_bytes(take_array(data, 33)?),
                signature: take_array(data, 41)?,
            }),
            TYPE_ADMITTED => {
                let tier = *data.get(1).ok_or(FrameError::TooShort {
                    expected: 2,
                    actual: data.len(),
                })?;
                Ok(Self::Admitted { tier })
            }
            TYPE_REJECTED => {
                let reason = *data.get(1).ok_or(FrameError::TooShort {
                    expected: 2,
                    actual: data.len(),
                })?;
                Ok(Self::Rejected { reason })
            }
            TYPE_REQUEST => {
                let reply_tag = u64::from_be_bytes(take_array(data, 1)?);
                let (category, at) = read_ident(data, 9)?;
                let (command, at) = read_ident(data, at)?;
                let parts = read_parts(data, at)?;
                Ok(Self::Request {
                    reply_tag,
                    category,
                    command,
                    parts,
                })
            }
            TYPE_REPLY => {
                let reply_tag = u64::from_be_bytes(take_array(data, 1)?);
                let parts = read_parts(data, 9)?;
                Ok(Self::Reply { reply_tag, parts })
            }
            t => Err(FrameError::UnknownType(t)),
        }
    }

    /// Returns the wire type byte for this frame.
    #[must_use]
    pub const fn frame_type(&self) -> u8 {
        match self {
            Self::Challenge { .. } => TYPE_CHALLENGE,
            Self::Response { .. } => TYPE_RESPONSE,
            Self::Admitted { .. } => TYPE_ADMITTED,
            Self::Rejected { .. } => TYPE_REJECTED,
            Self::Request { .. } => TYPE_REQUEST,
            Self::Reply { .. } => TYPE_REPLY,
        }
    }
}
