use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use haven_common::encoding;
use haven_common::frame::{admission_digest, Frame};
use haven_common::keys::KeyPair;
use haven_common::pow::check_pow;
use haven_common::signature::generate_signature;
use haven_common::util;

use havend::config::NodeConfig;
use havend::directory::{PeerDirectory, PeerRecord};
use havend::logbuf::LogBuffer;
use havend::node::{ServiceNode, StoreMessage};
use havend::{run, ServerState};

pub fn test_config(listen: SocketAddr, admin_keys: Vec<String>) -> NodeConfig {
    NodeConfig {
        listen,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        admin_keys,
        workers: 1,
        max_conns: 100,
        admit_timeout: 5,
        idle_timeout: 120,
        difficulty_record: "difficulty.invalid".to_string(),
        version_record: "version.invalid".to_string(),
        difficulty_refresh: 600,
    }
}

pub struct TestNode {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    pub node: Arc<ServiceNode>,
    pub directory: Arc<PeerDirectory>,
}

pub async fn start_node(admin_keys: Vec<String>) -> TestNode {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let node = Arc::new(ServiceNode::new());
    let directory = Arc::new(PeerDirectory::new());
    let state = Arc::new(ServerState::new(
        test_config(addr, admin_keys),
        KeyPair::generate(),
        Arc::clone(&node),
        Arc::clone(&directory),
        LogBuffer::default(),
    ));

    let state_clone = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    TestNode {
        addr,
        state,
        node,
        directory,
    }
}

/// Registers a keypair's X25519 identity as a fleet member so its
/// connection is admitted at the AuthenticatedPeer tier.
pub fn register_peer(node: &TestNode, keypair: &KeyPair) {
    node.directory.set_peers(vec![PeerRecord {
        pubkey_x25519: keypair.public_key_x25519(),
        ip: "127.0.0.1".parse().unwrap(),
        port: node.addr.port(),
    }]);
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestPeer {
    pub ws_tx: futures_util::stream::SplitSink<WsStream, Message>,
    pub ws_rx: futures_util::stream::SplitStream<WsStream>,
    pub tier: u8,
    next_tag: u64,
}

impl TestPeer {
    /// Connects and completes the admission handshake.
    pub async fn connect(addr: &SocketAddr, keypair: &KeyPair) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let (mut ws_tx, mut ws_rx) = ws.split();

        let challenge_msg = ws_rx.next().await.unwrap().unwrap();
        let Message::Binary(challenge_data) = challenge_msg else {
            panic!("expected binary challenge frame");
        };
        let Frame::Challenge { challenge, .. } = Frame::parse(&challenge_data).unwrap() else {
            panic!("expected challenge frame");
        };

        let pubkey = *keypair.public_key.as_bytes();
        let timestamp_ms = util::get_time_ms();
        let digest = admission_digest(&challenge, &pubkey, timestamp_ms);
        let signature = generate_signature(&digest, keypair).to_bytes();

        let response = Frame::Response {
            pubkey,
            timestamp_ms,
            signature,
        };
        ws_tx
            .send(Message::Binary(response.serialize()))
            .await
            .unwrap();

        let admit_msg = ws_rx.next().await.unwrap().unwrap();
        let Message::Binary(admit_data) = admit_msg else {
            panic!("expected binary admission frame");
        };
        let Frame::Admitted { tier } = Frame::parse(&admit_data).unwrap() else {
            panic!("expected Admitted frame");
        };

        Self {
            ws_tx,
            ws_rx,
            tier,
            next_tag: 1,
        }
    }

    /// Sends a request and returns its reply tag.
    pub async fn request(&mut self, category: &str, command: &str, parts: Vec<Vec<u8>>) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        let frame = Frame::request(tag, category, command, parts);
        self.ws_tx
            .send(Message::Binary(frame.serialize()))
            .await
            .unwrap();
        tag
    }

    /// Waits for the next reply frame.
    pub async fn recv_reply(&mut self) -> (u64, Vec<Vec<u8>>) {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for reply")
                .unwrap()
                .unwrap();
            match msg {
                Message::Binary(data) => match Frame::parse(&data).unwrap() {
                    Frame::Reply { reply_tag, parts } => return (reply_tag, parts),
                    other => panic!("expected reply frame, got {other:?}"),
                },
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("expected binary frame, got {other:?}"),
            }
        }
    }

    /// Waits for a reply, or `None` if nothing arrives in time.
    pub async fn recv_reply_timeout(&mut self, timeout: Duration) -> Option<(u64, Vec<Vec<u8>>)> {
        tokio::time::timeout(timeout, self.recv_reply()).await.ok()
    }
}

/// Builds a store message with a brute-forced valid nonce and hash at
/// difficulty 1.
pub fn solved_message(pub_key: &str, data: &str) -> StoreMessage {
    let timestamp = util::get_time_ms();
    let ttl = 60_000u64;
    for i in 0u64..5_000_000 {
        let nonce = encoding::to_base64(&i.to_be_bytes());
        if let Some(hash) = check_pow(
            &nonce,
            &timestamp.to_string(),
            &ttl.to_string(),
            pub_key,
            data,
            1,
        ) {
            return StoreMessage {
                pub_key: pub_key.to_string(),
                data: data.to_string(),
                ttl,
                timestamp,
                nonce,
                hash,
            };
        }
    }
    panic!("no nonce found at difficulty 1");
}
