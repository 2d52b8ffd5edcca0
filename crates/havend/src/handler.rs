//! Handlers for onion-routed and proxied client traffic.
//!
//! The RPC layer validates envelope shape and hands `(key, ciphertext)`
//! pairs here. This is where onion payloads enter the core: the outer
//! sealed layer is opened with the node's sealed-channel secret on a
//! blocking task, and the opened inner payload is surfaced through the
//! reply callback. Executing the inner request is the embedding
//! application's concern, not this layer's.

use tracing::debug;

use haven_common::encoding;
use haven_common::sealed;

use crate::dispatch::{Response, Status};

/// Reply continuation for asynchronous handlers. May fire on any
/// worker; the dispatch-time reply sink is move-captured inside.
pub type ReplyFn = Box<dyn FnOnce(Response) + Send + 'static>;

/// Payload schema of an onion request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnionReqVersion {
    /// Ciphertext part is base64 text.
    V1,
    /// Ciphertext part is raw binary.
    V2,
}

/// Opens client payload envelopes addressed to this node.
pub struct RequestHandler {
    sealed_secret: [u8; 32],
}

impl RequestHandler {
    /// Creates a handler around the node's sealed-channel secret.
    #[must_use]
    pub fn new(sealed_secret: [u8; 32]) -> Self {
        Self { sealed_secret }
    }

    /// Processes an onion request: `(ephemeral_key, ciphertext)`.
    ///
    /// Fire-and-continue: the reply callback receives the outcome once
    /// the outer layer has been opened off the async runtime.
    pub fn process_onion_req(
        &self,
        eph_key: Vec<u8>,
        ciphertext: Vec<u8>,
        version: OnionReqVersion,
        reply: ReplyFn,
    ) {
        let secret = self.sealed_secret;
        tokio::task::spawn_blocking(move || {
            let ciphertext = match version {
                OnionReqVersion::V2 => ciphertext,
                OnionReqVersion::V1 => {
                    let Ok(text) = std::str::from_utf8(&ciphertext) else {
                        reply(Response::error(Status::BadRequest, "Invalid onion request"));
                        return;
                    };
                    match encoding::from_base64(text) {
                        Ok(raw) => raw,
                        Err(e) => {
                            debug!(%e, "onion request ciphertext is not base64");
                            reply(Response::error(Status::BadRequest, "Invalid onion request"));
                            return;
                        }
                    }
                }
            };
            match sealed::open(&secret, &eph_key, &ciphertext) {
                Ok(plaintext) => reply(Response::ok(plaintext)),
                Err(e) => {
                    debug!(%e, "failed to open onion request");
                    reply(Response::error(Status::BadRequest, "Invalid onion request"));
                }
            }
        });
    }

    /// Processes a proxied exit request: `(client_key, payload)`.
    ///
    /// The client key is the ephemeral key the payload was sealed with.
    pub fn process_proxy_exit(&self, client_key: Vec<u8>, payload: Vec<u8>, reply: ReplyFn) {
        let secret = self.sealed_secret;
        tokio::task::spawn_blocking(move || match sealed::open(&secret, &client_key, &payload) {
            Ok(plaintext) => reply(Response::ok(plaintext)),
            Err(e) => {
                debug!(%e, "failed to open proxy exit payload");
                reply(Response::error(Status::BadRequest, "Invalid proxy request"));
            }
        });
    }
}
