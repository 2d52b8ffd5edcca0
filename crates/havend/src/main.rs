#![forbid(unsafe_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use haven_common::keys::KeyPair;

use havend::config::{Args, NodeConfig};
use havend::directory::PeerDirectory;
use havend::logbuf::{LogBuffer, RingBufferLayer};
use havend::metrics::{counters, start_metrics_server, ReadyState};
use havend::node::ServiceNode;
use havend::oracle::DifficultyOracle;
use havend::{run, ServerState};

/// Interval between latest-version checks.
const VERSION_CHECK_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> Result<()> {
    let log_buffer = LogBuffer::default();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(RingBufferLayer::new(log_buffer.clone()))
        .init();

    let args = Args::parse();
    let config: NodeConfig = args.clone().into();

    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let keypair = if let Some(ref path) = args.key_file {
        load_keypair(path)?
    } else {
        generate_keypair()
    };

    info!(
        "node pubkey: {} ({})",
        keypair.public_key.to_hex(),
        keypair.public_key.to_base32z()
    );
    info!("node x25519 pubkey: {}", hex::encode(keypair.public_key_x25519()));
    for key in &config.admin_keys {
        info!("stats access key: {}", key);
    }

    let node = Arc::new(ServiceNode::new());
    let directory = Arc::new(PeerDirectory::new());
    let state = Arc::new(ServerState::new(
        config.clone(),
        keypair,
        Arc::clone(&node),
        Arc::clone(&directory),
        log_buffer,
    ));

    // Not ready until the oracle delivers a difficulty schedule; an
    // empty history rejects every client submission.
    let ready_state = ReadyState::new();
    tokio::spawn({
        let ready_state = ready_state.clone();
        let metrics_addr = config.metrics_addr;
        async move {
            if let Err(e) = start_metrics_server(metrics_addr, ready_state).await {
                warn!("metrics server error: {}", e);
            }
        }
    });

    start_oracle_tasks(&config, &node, ready_state);

    let listener = TcpListener::bind(config.listen).await?;

    tokio::select! {
        result = run(listener, state) => {
            if let Err(e) = result {
                tracing::error!("server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}

/// Spawns the difficulty refresh and version check loops.
///
/// Oracle failures leave the node's previous difficulty history in
/// place; a node that never reaches DNS keeps an empty history,
/// rejects client submissions outright, and stays not-ready.
fn start_oracle_tasks(config: &NodeConfig, node: &Arc<ServiceNode>, ready_state: ReadyState) {
    let oracle = match DifficultyOracle::new(&config.difficulty_record, &config.version_record) {
        Ok(oracle) => Arc::new(oracle),
        Err(e) => {
            warn!("difficulty oracle unavailable, node will stay not-ready: {}", e);
            return;
        }
    };

    tokio::spawn({
        let oracle = Arc::clone(&oracle);
        let node = Arc::clone(node);
        let refresh = Duration::from_secs(config.difficulty_refresh);
        async move {
            let mut ticker = interval(refresh);
            loop {
                ticker.tick().await;
                match oracle.query_pow_difficulty().await {
                    Ok(history) => {
                        counters::oracle_refresh_total("ok");
                        ready_state.set_ready(!history.is_empty());
                        node.set_difficulty_history(history);
                    }
                    Err(e) => {
                        counters::oracle_refresh_total("error");
                        warn!("PoW difficulty refresh failed, keeping previous history: {}", e);
                    }
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut ticker = interval(VERSION_CHECK_INTERVAL);
        loop {
            ticker.tick().await;
            oracle.check_latest_version().await;
        }
    });
}

fn load_keypair(path: &Path) -> Result<KeyPair> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path)?;
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            anyhow::bail!(
                "key file permissions too open: {:o}. Expected 0600",
                mode
            );
        }
    }

    let text = std::fs::read_to_string(path)?;
    let keypair = KeyPair::from_hex(text.trim())
        .map_err(|e| anyhow::anyhow!("key file {}: {}", path.display(), e))?;
    info!("loaded keypair from {}", path.display());
    Ok(keypair)
}

fn generate_keypair() -> KeyPair {
    warn!("using ephemeral keypair (not persisted)");
    KeyPair::generate()
}
