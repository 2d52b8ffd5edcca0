//! haven storage node — authenticated message-bus front door.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and node configuration.
pub mod config;
mod connection;
/// Peer directory: X25519 pubkey to network endpoint resolution.
pub mod directory;
/// Command table, capability tiers and the worker pool.
pub mod dispatch;
/// Error types for node operations.
pub mod error;
/// Onion and proxy request handlers.
pub mod handler;
/// In-process ring buffer of recent log lines.
pub mod logbuf;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Service-node state: difficulty history, message store, stats.
pub mod node;
/// DNS TXT difficulty and version oracle.
pub mod oracle;
/// Pubkey-based routing table for admitted peers.
pub mod router;
/// Accept loop, shared server state and the command table wiring.
pub mod server;

pub use server::{run, ServerState};
