//! Per-connection lifecycle: admission handshake, tier binding and the
//! message loop.
//!
//! Admission proves ownership of the peer's Edwards key: the node sends
//! a random challenge and the peer signs the admission digest with the
//! detached-signature engine. The peer's X25519 bus identity is the
//! Montgomery image of the key that signed, computed here and never
//! taken from the wire, so a remote cannot claim another peer's (or an
//! admin's) identity. The capability tier is fixed at admission and
//! never changes for the life of the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::rngs::OsRng;
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use haven_common::frame::{admission_digest, rejection_reason, Frame, MAX_FRAME_SIZE};
use haven_common::keys::{x25519_from_edwards, PublicKey};
use haven_common::signature::{check_signature, Signature};
use haven_common::util;

use crate::dispatch::{CapabilityTier, DispatchOutcome, ReplySink, RequestContext, Response, Status};
use crate::error::NodeError;
use crate::metrics::{counters, gauges, histograms};
use crate::router::ConnHandle;
use crate::server::ServerState;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsRecv = SplitStream<WebSocketStream<TcpStream>>;

/// Acceptable clock skew on admission timestamps.
const ADMISSION_TOLERANCE_MS: u64 = 30_000;

/// Interval between transport-level keepalive pings.
const WS_PING_INTERVAL_SECS: u64 = 30;

/// Identity and tier established by a successful admission.
struct Admitted {
    pubkey_x25519: [u8; 32],
    tier: CapabilityTier,
}

/// Reads and validates the peer's admission response.
async fn admit(
    ws_rx: &mut WsRecv,
    challenge: &[u8; 32],
    state: &ServerState,
) -> Result<Admitted, NodeError> {
    let msg = ws_rx
        .next()
        .await
        .ok_or(NodeError::ConnectionClosed)?
        .map_err(NodeError::WebSocket)?;

    let Message::Binary(data) = msg else {
        return Err(NodeError::InvalidAdmission);
    };

    let Frame::Response {
        pubkey,
        timestamp_ms,
        signature,
    } = Frame::parse(&data)?
    else {
        return Err(NodeError::InvalidAdmission);
    };

    let now = util::get_time_ms();
    if now.abs_diff(timestamp_ms) > ADMISSION_TOLERANCE_MS {
        return Err(NodeError::TimestampExpired);
    }

    let pubkey = PublicKey::from_bytes(pubkey);
    let digest = admission_digest(challenge, pubkey.as_bytes(), timestamp_ms);
    let sig = Signature::from_bytes(&signature);
    if !check_signature(&sig, &digest, &pubkey) {
        return Err(NodeError::InvalidAdmission);
    }

    // The bus identity is a pure function of the key that just signed.
    let Some(pubkey_x25519) = x25519_from_edwards(&pubkey) else {
        return Err(NodeError::InvalidAdmission);
    };

    let tier = if state.admin_keys.contains(&pubkey_x25519) {
        CapabilityTier::Admin
    } else if state.directory.contains(&pubkey_x25519) {
        CapabilityTier::AuthenticatedPeer
    } else {
        CapabilityTier::Anonymous
    };

    Ok(Admitted {
        pubkey_x25519,
        tier,
    })
}

/// Sends a challenge, waits for a valid admission response, and
/// acknowledges with the assigned tier.
async fn perform_admission(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    state: &ServerState,
) -> Result<Admitted, NodeError> {
    let mut challenge = [0u8; 32];
    OsRng.fill(&mut challenge);

    let challenge_frame = Frame::Challenge {
        challenge,
        server_pubkey: *state.keypair.public_key.as_bytes(),
    };
    ws_tx
        .send(Message::Binary(challenge_frame.serialize()))
        .await
        .map_err(NodeError::WebSocket)?;

    match timeout(
        Duration::from_secs(state.config.admit_timeout),
        admit(ws_rx, &challenge, state),
    )
    .await
    {
        Ok(Ok(admitted)) => {
            counters::admissions_total("admitted");
            let frame = Frame::Admitted {
                tier: admitted.tier.as_u8(),
            };
            ws_tx
                .send(Message::Binary(frame.serialize()))
                .await
                .map_err(NodeError::WebSocket)?;
            Ok(admitted)
        }
        Ok(Err(e)) => {
            counters::admissions_total("rejected");
            let reason = match &e {
                NodeError::TimestampExpired => rejection_reason::TIMESTAMP_EXPIRED,
                _ => rejection_reason::BAD_SIG,
            };
            let _ = ws_tx
                .send(Message::Binary(Frame::Rejected { reason }.serialize()))
                .await;
            debug!(reason, "sent admission rejection");
            Err(e)
        }
        Err(_) => {
            counters::admissions_total("timeout");
            let frame = Frame::Rejected {
                reason: rejection_reason::TIMEOUT,
            };
            let _ = ws_tx.send(Message::Binary(frame.serialize())).await;
            Err(NodeError::InvalidAdmission)
        }
    }
}

/// Drives the request/reply loop for an admitted connection.
async fn run_message_loop(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    deliver_rx: &mut mpsc::Receiver<Vec<u8>>,
    state: &ServerState,
    conn_handle: &ConnHandle,
) -> Result<(), NodeError> {
    let mut ping_interval = interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
    let idle_timeout = Duration::from_secs(state.config.idle_timeout);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        process_frame(&data, state, conn_handle)?;
                        histograms::dispatch_latency_seconds(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            debug!("failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(NodeError::WebSocket(e)),
                    _ => {}
                }
            }
            Some(data) = deliver_rx.recv() => {
                last_activity = Instant::now();
                ws_tx.send(Message::Binary(data)).await.map_err(NodeError::WebSocket)?;
            }
            _ = ping_interval.tick() => {
                if last_activity.elapsed() >= idle_timeout {
                    debug!("idle timeout reached, closing connection");
                    return Ok(());
                }
                if let Err(e) = ws_tx.send(Message::Ping(vec![])).await {
                    debug!("failed to send ping: {}", e);
                }
            }
        }
    }
}

/// Accepts, admits and serves one inbound connection.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), NodeError> {
    // Bound the number of sockets sitting in the handshake so a flood of
    // unauthenticated connections cannot exhaust file descriptors.
    let permit = state
        .pre_auth_semaphore
        .acquire()
        .await
        .map_err(|_| NodeError::ConnectionClosed)?;

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(MAX_FRAME_SIZE);
    ws_config.max_frame_size = Some(MAX_FRAME_SIZE);

    let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config))
        .await
        .map_err(NodeError::WebSocket)?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let admitted = perform_admission(&mut ws_tx, &mut ws_rx, &state).await?;
    drop(permit);

    let (deliver_tx, mut deliver_rx) = mpsc::channel::<Vec<u8>>(256);
    let admitted_at = Instant::now();
    let conn_handle = ConnHandle {
        tx: deliver_tx,
        pubkey: admitted.pubkey_x25519,
        tier: admitted.tier,
        admitted_at,
    };

    if let Some(old_handle) = state.router.insert(admitted.pubkey_x25519, conn_handle.clone()) {
        drop(old_handle);
    }

    state.node.connection_delta(1);
    gauges::inc_connections_active();
    info!(
        peer = %peer_addr,
        pubkey = %hex::encode(admitted.pubkey_x25519),
        tier = ?admitted.tier,
        "peer admitted"
    );

    let result = run_message_loop(&mut ws_tx, &mut ws_rx, &mut deliver_rx, &state, &conn_handle).await;

    state.router.remove_if(&admitted.pubkey_x25519, admitted_at);
    state.node.connection_delta(-1);
    gauges::dec_connections_active();
    result
}

/// Parses one inbound frame and routes requests through the command
/// table. Tier denials are transport-level: the request is dropped
/// without an application reply, so the remote sees a timeout.
fn process_frame(
    data: &[u8],
    state: &ServerState,
    conn_handle: &ConnHandle,
) -> Result<(), NodeError> {
    match Frame::parse(data)? {
        Frame::Request {
            reply_tag,
            category,
            command,
            parts,
        } => {
            state.node.bump_rpc_requests();
            counters::rpc_requests_total(match category.as_str() {
                "sn" => "sn",
                "service" => "service",
                _ => "other",
            });

            let ctx = RequestContext {
                origin: conn_handle.pubkey,
                tier: conn_handle.tier,
                parts,
                reply: ReplySink::new(reply_tag, conn_handle.tx.clone()),
            };
            match state.dispatcher.dispatch(&category, &command, ctx) {
                DispatchOutcome::Dispatched => {}
                DispatchOutcome::Unknown => {
                    counters::rpc_unknown_command_total();
                    debug!(%category, %command, "unknown command");
                    ReplySink::new(reply_tag, conn_handle.tx.clone()).send_response(
                        Response::error(Status::NotFound, "Unknown command"),
                    );
                }
                DispatchOutcome::Denied => {
                    counters::rpc_auth_denied_total();
                    warn!(
                        from = %hex::encode(conn_handle.pubkey),
                        %category,
                        %command,
                        "refusing command above peer tier"
                    );
                }
            }
        }
        Frame::Reply { reply_tag, .. } => {
            debug!(reply_tag, "ignoring unsolicited reply frame");
        }
        other => {
            debug!(
                frame_type = other.frame_type(),
                "ignoring unexpected frame type post-admission"
            );
        }
    }
    Ok(())
}
