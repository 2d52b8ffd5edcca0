//! Shared server state, command table wiring and the accept loop.
//!
//! [`ServerState::new`] is the init point where the node and request
//! handler are bound to the command table; both are held by non-owning
//! `Arc` references for the server's lifetime. Must be called from
//! within a tokio runtime (the dispatcher spawns its worker tasks).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use haven_common::frame::Frame;
use haven_common::keys::KeyPair;

use crate::config::NodeConfig;
use crate::connection::handle_connection;
use crate::directory::PeerDirectory;
use crate::dispatch::{CapabilityTier, Dispatcher, Response, Status};
use crate::error::NodeError;
use crate::handler::{OnionReqVersion, RequestHandler};
use crate::logbuf::LogBuffer;
use crate::node::ServiceNode;
use crate::router::Router;

/// Errors from outbound sends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The peer is in the directory but holds no live connection.
    #[error("peer not connected")]
    NotConnected,
    /// The peer is unknown to the directory; the send is non-routable.
    #[error("peer node not found")]
    Unknown,
}

/// Shared state for the message-bus server.
pub struct ServerState {
    /// Runtime node configuration.
    pub config: NodeConfig,
    /// The node's long-term keypair.
    pub keypair: KeyPair,
    /// X25519 keys granted the admin tier. Immutable after init.
    pub admin_keys: Vec<[u8; 32]>,
    /// Service-node state shared with handlers.
    pub node: Arc<ServiceNode>,
    /// Fleet member directory.
    pub directory: Arc<PeerDirectory>,
    /// Routing table of admitted connections.
    pub router: Router,
    /// Command table plus worker pool.
    pub dispatcher: Dispatcher,
    /// Bounds unauthenticated (pre-admission) connections.
    pub pre_auth_semaphore: Semaphore,
    next_reply_tag: AtomicU64,
}

/// Maximum number of unauthenticated connections held open at once.
const MAX_PRE_AUTH_CONNECTIONS: usize = 512;

impl ServerState {
    /// Builds the server state and wires the command table.
    #[must_use]
    pub fn new(
        config: NodeConfig,
        keypair: KeyPair,
        node: Arc<ServiceNode>,
        directory: Arc<PeerDirectory>,
        log_buffer: LogBuffer,
    ) -> Self {
        let admin_keys = config.admin_keys_bin();
        let handler = Arc::new(RequestHandler::new(
            keypair.private_key().to_sealed_secret(),
        ));
        let dispatcher = build_dispatcher(
            config.workers,
            Arc::clone(&node),
            handler,
            log_buffer,
        );
        Self {
            config,
            keypair,
            admin_keys,
            node,
            directory,
            router: Router::new(),
            dispatcher,
            pre_auth_semaphore: Semaphore::new(MAX_PRE_AUTH_CONNECTIONS),
            next_reply_tag: AtomicU64::new(1),
        }
    }

    /// Sends `category.command` to a fleet peer by X25519 key over its
    /// live bus connection, returning the reply tag.
    ///
    /// # Errors
    ///
    /// [`SendError::Unknown`] if the directory has no such peer,
    /// [`SendError::NotConnected`] if it has no live connection.
    pub fn send_to_peer(
        &self,
        pubkey: &[u8; 32],
        category: &str,
        command: &str,
        parts: Vec<Vec<u8>>,
    ) -> Result<u64, SendError> {
        if let Some(handle) = self.router.get(pubkey) {
            let tag = self.next_reply_tag.fetch_add(1, Ordering::Relaxed);
            let bytes = Frame::request(tag, category, command, parts).serialize();
            if handle.tx.try_send(bytes).is_ok() {
                return Ok(tag);
            }
            self.router.remove_if(pubkey, handle.admitted_at);
        }
        match self.directory.find_endpoint(pubkey) {
            Some(endpoint) => {
                debug!(%endpoint, "peer known but not reachable over the bus");
                Err(SendError::NotConnected)
            }
            None => {
                debug!(pubkey = %hex::encode(pubkey), "peer node not found");
                Err(SendError::Unknown)
            }
        }
    }
}

/// Registers every bus command with its capability tier and handler.
fn build_dispatcher(
    workers: usize,
    node: Arc<ServiceNode>,
    handler: Arc<RequestHandler>,
    log_buffer: LogBuffer,
) -> Dispatcher {
    let mut dispatcher = Dispatcher::new(workers);

    {
        let node = Arc::clone(&node);
        dispatcher.add_command(
            "sn",
            "data",
            CapabilityTier::AuthenticatedPeer,
            move |ctx| {
                debug!(from = %hex::encode(ctx.origin), "handle sn.data");
                let blob = ctx.parts.concat();
                node.process_push_batch(&blob);
                ctx.reply.send_parts(vec![Vec::new()]);
            },
        );
    }

    {
        let handler = Arc::clone(&handler);
        dispatcher.add_command(
            "sn",
            "proxy_exit",
            CapabilityTier::AuthenticatedPeer,
            move |ctx| {
                debug!(from = %hex::encode(ctx.origin), "handle sn.proxy_exit");
                if ctx.parts.len() != 2 {
                    debug!("expected 2 message parts, got {}", ctx.parts.len());
                    ctx.reply.send_response(Response::error(
                        Status::BadRequest,
                        "Incorrect number of messages",
                    ));
                    return;
                }
                let mut parts = ctx.parts;
                let payload = parts.pop().unwrap_or_default();
                let client_key = parts.pop().unwrap_or_default();
                let reply = ctx.reply;
                handler.process_proxy_exit(
                    client_key,
                    payload,
                    Box::new(move |res| {
                        debug!(status = %res.status, "proxy exit status");
                        reply.send_response(res);
                    }),
                );
            },
        );
    }

    for (command, version) in [
        ("onion_req", OnionReqVersion::V1),
        ("onion_req_v2", OnionReqVersion::V2),
    ] {
        let node = Arc::clone(&node);
        let handler = Arc::clone(&handler);
        dispatcher.add_command(
            "sn",
            command,
            CapabilityTier::AuthenticatedPeer,
            move |ctx| {
                if matches!(ctx.parts.as_slice(), [p] if p.as_slice() == &b"ping"[..]) {
                    debug!("remote pinged me");
                    node.update_last_ping();
                    ctx.reply.send_response(Response::ok(&b"pong"[..]));
                    return;
                }
                if ctx.parts.len() != 2 {
                    error!("expected 2 message parts, got {}", ctx.parts.len());
                    ctx.reply.send_response(Response::error(
                        Status::BadRequest,
                        "Incorrect number of messages",
                    ));
                    return;
                }
                let mut parts = ctx.parts;
                let ciphertext = parts.pop().unwrap_or_default();
                let eph_key = parts.pop().unwrap_or_default();
                let reply = ctx.reply;
                handler.process_onion_req(
                    eph_key,
                    ciphertext,
                    version,
                    Box::new(move |res| reply.send_response(res)),
                );
            },
        );
    }

    {
        let node = Arc::clone(&node);
        dispatcher.add_command(
            "service",
            "get_stats",
            CapabilityTier::Admin,
            move |ctx| {
                debug!("received get_stats request over the bus");
                ctx.reply.send_parts(vec![node.get_stats().into_bytes()]);
            },
        );
    }

    dispatcher.add_command(
        "service",
        "get_logs",
        CapabilityTier::Admin,
        move |ctx| {
            debug!("received get_logs request over the bus");
            let val = serde_json::json!({ "entries": log_buffer.peek() });
            let body = serde_json::to_string_pretty(&val).unwrap_or_default();
            ctx.reply.send_parts(vec![body.into_bytes()]);
        },
    );

    dispatcher
}

/// Runs the accept loop until the listener fails.
///
/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), NodeError> {
    let local_addr = listener.local_addr().map_err(NodeError::Io)?;
    info!("message bus listening on tcp://{}", local_addr);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if state.router.len() >= state.config.max_conns {
                    warn!("max connections reached, rejecting {}", addr);
                    drop(stream);
                    continue;
                }

                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, state).await {
                        debug!("connection from {} closed: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}
