//! Routing table of admitted peers, keyed by X25519 public key.

use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::dispatch::CapabilityTier;

/// Handle held in the routing table; used to push frames to a
/// connection's writer task.
#[derive(Clone, Debug)]
pub struct ConnHandle {
    /// Channel sender delivering serialized frames to the connection.
    pub tx: mpsc::Sender<Vec<u8>>,
    /// The peer's X25519 public key.
    pub pubkey: [u8; 32],
    /// Capability tier assigned at admission.
    pub tier: CapabilityTier,
    /// Instant of admission, used to guard against stale removals.
    pub admitted_at: Instant,
}

/// Concurrent pubkey → connection routing table.
#[derive(Debug, Default)]
pub struct Router {
    routes: DashMap<[u8; 32], ConnHandle>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a connection handle, returning any previous handle for
    /// the same key. A reconnecting peer replaces its old entry.
    #[must_use]
    pub fn insert(&self, pubkey: [u8; 32], handle: ConnHandle) -> Option<ConnHandle> {
        self.routes.insert(pubkey, handle)
    }

    /// Removes the entry only if it was admitted at the given instant,
    /// so a newer connection for the same key survives.
    pub fn remove_if(&self, pubkey: &[u8; 32], admitted_at: Instant) {
        self.routes
            .remove_if(pubkey, |_k, v| v.admitted_at == admitted_at);
    }

    /// Looks up a connection handle by public key.
    #[must_use]
    pub fn get(&self, pubkey: &[u8; 32]) -> Option<ConnHandle> {
        self.routes.get(pubkey).map(|entry| entry.value().clone())
    }

    /// Number of admitted connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no peers are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_handle(pubkey: [u8; 32]) -> (ConnHandle, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(1);
        let handle = ConnHandle {
            tx,
            pubkey,
            tier: CapabilityTier::AuthenticatedPeer,
            admitted_at: Instant::now(),
        };
        (handle, rx)
    }

    #[test]
    fn insert_and_get() {
        let router = Router::new();
        let key = [1u8; 32];
        let (handle, _rx) = make_handle(key);
        assert!(router.insert(key, handle).is_none());
        assert_eq!(router.get(&key).unwrap().pubkey, key);
        assert!(router.get(&[2u8; 32]).is_none());
    }

    #[test]
    fn reconnect_replaces_old_handle() {
        let router = Router::new();
        let key = [1u8; 32];
        let (first, _rx1) = make_handle(key);
        let (second, _rx2) = make_handle(key);
        assert!(router.insert(key, first).is_none());
        assert!(router.insert(key, second).is_some());
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn remove_if_guards_against_stale_removal() {
        let router = Router::new();
        let key = [1u8; 32];
        let (handle, _rx) = make_handle(key);
        let admitted_at = handle.admitted_at;
        let _ = router.insert(key, handle);

        router.remove_if(&key, admitted_at + std::time::Duration::from_secs(1));
        assert_eq!(router.len(), 1);

        router.remove_if(&key, admitted_at);
        assert!(router.is_empty());
    }
}
