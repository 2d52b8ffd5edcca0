//! Peer directory: resolves fleet members' X25519 public keys to their
//! message-bus endpoints.
//!
//! The directory is read-mostly. The membership subsystem replaces the
//! whole peer set at once; readers hold a point-in-time snapshot and
//! never observe in-place mutation.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

/// One fleet member as published by the membership subsystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerRecord {
    /// The peer's X25519 public key.
    pub pubkey_x25519: [u8; 32],
    /// The peer's advertised IP address.
    pub ip: IpAddr,
    /// The peer's message-bus port.
    pub port: u16,
}

/// Snapshot-swapped map of known fleet members.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: RwLock<Arc<HashMap<[u8; 32], PeerRecord>>>,
}

impl PeerDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the peer set.
    pub fn set_peers(&self, peers: Vec<PeerRecord>) {
        let map: HashMap<_, _> = peers
            .into_iter()
            .map(|p| (p.pubkey_x25519, p))
            .collect();
        *self.peers.write().expect("directory lock poisoned") = Arc::new(map);
    }

    /// Returns the current snapshot.
    #[must_use]
    fn snapshot(&self) -> Arc<HashMap<[u8; 32], PeerRecord>> {
        Arc::clone(&self.peers.read().expect("directory lock poisoned"))
    }

    /// Resolves a peer's message-bus endpoint.
    ///
    /// `None` means the peer is unknown; sends to unknown peers are
    /// non-routable.
    #[must_use]
    pub fn find_endpoint(&self, pubkey_x25519: &[u8; 32]) -> Option<String> {
        self.snapshot()
            .get(pubkey_x25519)
            .map(|p| format!("tcp://{}:{}", p.ip, p.port))
    }

    /// Returns `true` if the key belongs to a known fleet member.
    #[must_use]
    pub fn contains(&self, pubkey_x25519: &[u8; 32]) -> bool {
        self.snapshot().contains_key(pubkey_x25519)
    }

    /// Number of known peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns `true` if no peers are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u8, port: u16) -> PeerRecord {
        let mut key = [0u8; 32];
        key[0] = id;
        PeerRecord {
            pubkey_x25519: key,
            ip: "10.1.2.3".parse().unwrap(),
            port,
        }
    }

    #[test]
    fn find_endpoint_formats_address() {
        let dir = PeerDirectory::new();
        dir.set_peers(vec![record(1, 22021)]);
        let mut key = [0u8; 32];
        key[0] = 1;
        assert_eq!(
            dir.find_endpoint(&key),
            Some("tcp://10.1.2.3:22021".to_string())
        );
    }

    #[test]
    fn unknown_peer_is_none() {
        let dir = PeerDirectory::new();
        dir.set_peers(vec![record(1, 22021)]);
        assert_eq!(dir.find_endpoint(&[9u8; 32]), None);
        assert!(!dir.contains(&[9u8; 32]));
    }

    #[test]
    fn set_peers_replaces_whole_snapshot() {
        let dir = PeerDirectory::new();
        dir.set_peers(vec![record(1, 1000), record(2, 2000)]);
        assert_eq!(dir.len(), 2);

        let old = dir.snapshot();
        dir.set_peers(vec![record(3, 3000)]);

        // The old snapshot is untouched; the new one is complete.
        assert_eq!(old.len(), 2);
        assert_eq!(dir.len(), 1);
        let mut key = [0u8; 32];
        key[0] = 1;
        assert!(!dir.contains(&key));
    }

    #[test]
    fn empty_directory() {
        let dir = PeerDirectory::new();
        assert!(dir.is_empty());
        assert_eq!(dir.find_endpoint(&[0u8; 32]), None);
    }
}
