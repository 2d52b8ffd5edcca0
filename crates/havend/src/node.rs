//! Service-node state shared by every handler.
//!
//! Holds the PoW difficulty schedule, the in-memory store-and-forward
//! message map, operational counters and the last-reachable timestamp.
//! The difficulty history is replaced atomically as a whole; readers of
//! [`ServiceNode::difficulty_history`] always see a consistent snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use haven_common::pow::{check_pow, valid_difficulty, PowDifficulty};
use haven_common::util;

/// One client-submitted store-and-forward message, as carried in a
/// push batch between fleet members.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreMessage {
    /// Recipient public key, client text form.
    pub pub_key: String,
    /// Message body, base64.
    pub data: String,
    /// Time to live in milliseconds.
    pub ttl: u64,
    /// Submission timestamp in milliseconds since epoch.
    pub timestamp: u64,
    /// PoW nonce, base64 of 8 raw bytes.
    pub nonce: String,
    /// Expected lowercase-hex SHA-512 message hash.
    pub hash: String,
}

#[derive(Debug, Default)]
struct Counters {
    push_batches: AtomicU64,
    stored: AtomicU64,
    pow_failures: AtomicU64,
    rpc_requests: AtomicU64,
    connections_in: AtomicU64,
}

/// Core node state. One instance lives for the process lifetime and is
/// shared with the RPC server by non-owning reference at init time.
pub struct ServiceNode {
    pow_history: RwLock<Arc<Vec<PowDifficulty>>>,
    curr_difficulty: Mutex<PowDifficulty>,
    store: DashMap<String, Vec<StoreMessage>>,
    counters: Counters,
    last_reachable_ms: AtomicU64,
    started: Instant,
}

impl Default for ServiceNode {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceNode {
    /// Creates a node with an empty difficulty history and store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pow_history: RwLock::new(Arc::new(Vec::new())),
            curr_difficulty: Mutex::new(PowDifficulty {
                timestamp_ms: 0,
                difficulty: i32::MAX,
            }),
            store: DashMap::new(),
            counters: Counters::default(),
            last_reachable_ms: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    // -----------------------------------------------------------------
    // Difficulty schedule
    // -----------------------------------------------------------------

    /// Atomically replaces the difficulty history and re-derives the
    /// current difficulty (the newest entry).
    pub fn set_difficulty_history(&self, new_history: Vec<PowDifficulty>) {
        let mut current = self.curr_difficulty.lock().expect("difficulty lock");
        for entry in &new_history {
            if current.timestamp_ms < entry.timestamp_ms {
                *current = *entry;
            }
        }
        info!(difficulty = current.difficulty, "read PoW difficulty");
        drop(current);
        *self.pow_history.write().expect("history lock") = Arc::new(new_history);
    }

    /// Returns a snapshot of the difficulty history.
    #[must_use]
    pub fn difficulty_history(&self) -> Arc<Vec<PowDifficulty>> {
        Arc::clone(&self.pow_history.read().expect("history lock"))
    }

    /// Returns the difficulty currently in force.
    #[must_use]
    pub fn curr_pow_difficulty(&self) -> i32 {
        self.curr_difficulty.lock().expect("difficulty lock").difficulty
    }

    // -----------------------------------------------------------------
    // Message admission
    // -----------------------------------------------------------------

    /// Verifies a client submission: TTL bounds, timestamp freshness,
    /// PoW against the applicable difficulty, and hash equality.
    ///
    /// # Errors
    ///
    /// Returns a short reason string; callers report it verbatim.
    pub fn verify_message(
        &self,
        msg: &StoreMessage,
        history: &[PowDifficulty],
    ) -> Result<(), &'static str> {
        if !util::validate_ttl(msg.ttl) {
            return Err("Provided TTL is not valid");
        }
        if !util::validate_timestamp(msg.timestamp, msg.ttl) {
            return Err("Provided timestamp is not valid");
        }
        let difficulty = valid_difficulty(msg.timestamp, history);
        let Some(hash) = check_pow(
            &msg.nonce,
            &msg.timestamp.to_string(),
            &msg.ttl.to_string(),
            &msg.pub_key,
            &msg.data,
            difficulty,
        ) else {
            self.counters.pow_failures.fetch_add(1, Ordering::Relaxed);
            return Err("Provided PoW nonce is not valid");
        };
        if hash != msg.hash {
            return Err("Incorrect hash provided");
        }
        Ok(())
    }

    /// Verifies and stores every message of a peer push batch.
    ///
    /// Returns the number of messages accepted. Invalid JSON drops the
    /// whole batch; individually failing messages are skipped.
    pub fn process_push_batch(&self, blob: &[u8]) -> usize {
        if blob.is_empty() {
            return 0;
        }
        self.counters.push_batches.fetch_add(1, Ordering::Relaxed);

        let messages: Vec<StoreMessage> = match serde_json::from_slice(blob) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(%e, "failed to parse push batch");
                return 0;
            }
        };
        debug!(count = messages.len(), size = blob.len(), "got messages from peer");

        let history = self.difficulty_history();
        let mut accepted = 0usize;
        for msg in messages {
            match self.verify_message(&msg, &history) {
                Ok(()) => {
                    self.save_message(msg);
                    accepted += 1;
                }
                Err(reason) => debug!(reason, "dropping batch message"),
            }
        }
        accepted
    }

    fn save_message(&self, msg: StoreMessage) {
        self.counters.stored.fetch_add(1, Ordering::Relaxed);
        self.store.entry(msg.pub_key.clone()).or_default().push(msg);
    }

    /// Returns the stored messages for a recipient.
    #[must_use]
    pub fn retrieve(&self, pub_key: &str) -> Vec<StoreMessage> {
        self.store
            .get(pub_key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------
    // Reachability and stats
    // -----------------------------------------------------------------

    /// Records that a remote peer reached us over the message bus.
    pub fn update_last_ping(&self) {
        self.last_reachable_ms
            .store(util::get_time_ms(), Ordering::Relaxed);
    }

    /// Milliseconds-since-epoch of the last inbound reachability probe.
    #[must_use]
    pub fn last_reachable_ms(&self) -> u64 {
        self.last_reachable_ms.load(Ordering::Relaxed)
    }

    /// Counts one dispatched RPC request.
    pub fn bump_rpc_requests(&self) {
        self.counters.rpc_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a peer connection opening or closing.
    pub fn connection_delta(&self, delta: i64) {
        if delta >= 0 {
            self.counters
                .connections_in
                .fetch_add(delta as u64, Ordering::Relaxed);
        } else {
            self.counters
                .connections_in
                .fetch_sub(delta.unsigned_abs(), Ordering::Relaxed);
        }
    }

    /// Renders the stats blob served to admins.
    #[must_use]
    pub fn get_stats(&self) -> String {
        let val = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": self.started.elapsed().as_secs(),
            "total_stored": self.counters.stored.load(Ordering::Relaxed),
            "push_batches_received": self.counters.push_batches.load(Ordering::Relaxed),
            "pow_failures": self.counters.pow_failures.load(Ordering::Relaxed),
            "rpc_requests": self.counters.rpc_requests.load(Ordering::Relaxed),
            "connections_in": self.counters.connections_in.load(Ordering::Relaxed),
            "pow_difficulty": self.curr_pow_difficulty(),
            "last_reachable_ms": self.last_reachable_ms(),
        });
        serde_json::to_string_pretty(&val).expect("stats serialization")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_common::encoding;

    fn easy_history(now: u64) -> Vec<PowDifficulty> {
        vec![PowDifficulty {
            timestamp_ms: now.saturating_sub(1000),
            difficulty: 1,
        }]
    }

    /// Builds a message with a brute-forced valid nonce and hash.
    fn solved_message(pub_key: &str, data: &str) -> StoreMessage {
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
        panic!("no nonce found");
    }

    #[test]
    fn valid_message_is_stored() {
        let node = ServiceNode::new();
        node.set_difficulty_history(easy_history(util::get_time_ms()));
        let msg = solved_message("recipient", "aGVsbG8=");
        let blob = serde_json::to_vec(&vec![msg.clone()]).unwrap();
        assert_eq!(node.process_push_batch(&blob), 1);
        assert_eq!(node.retrieve("recipient"), vec![msg]);
    }

    #[test]
    fn wrong_hash_is_dropped() {
        let node = ServiceNode::new();
        node.set_difficulty_history(easy_history(util::get_time_ms()));
        let mut msg = solved_message("recipient", "aGVsbG8=");
        msg.hash = "00".repeat(64);
        let blob = serde_json::to_vec(&vec![msg]).unwrap();
        assert_eq!(node.process_push_batch(&blob), 0);
        assert!(node.retrieve("recipient").is_empty());
    }

    #[test]
    fn bad_ttl_is_dropped() {
        let node = ServiceNode::new();
        node.set_difficulty_history(easy_history(util::get_time_ms()));
        let mut msg = solved_message("recipient", "data");
        msg.ttl = 1;
        let err = node
            .verify_message(&msg, &node.difficulty_history())
            .unwrap_err();
        assert_eq!(err, "Provided TTL is not valid");
    }

    #[test]
    fn stale_timestamp_is_dropped() {
        let node = ServiceNode::new();
        let mut msg = solved_message("recipient", "data");
        msg.timestamp = 1000;
        let err = node
            .verify_message(&msg, &node.difficulty_history())
            .unwrap_err();
        assert_eq!(err, "Provided timestamp is not valid");
    }

    #[test]
    fn empty_history_rejects_pow() {
        // With no schedule the effective difficulty is i32::MAX, which
        // no nonce can satisfy.
        let node = ServiceNode::new();
        let msg = solved_message("recipient", "data");
        let err = node
            .verify_message(&msg, &node.difficulty_history())
            .unwrap_err();
        assert_eq!(err, "Provided PoW nonce is not valid");
    }

    #[test]
    fn malformed_batch_is_dropped_whole() {
        let node = ServiceNode::new();
        assert_eq!(node.process_push_batch(b"not json"), 0);
        assert_eq!(node.process_push_batch(b""), 0);
    }

    #[test]
    fn difficulty_history_snapshot_swap() {
        let node = ServiceNode::new();
        let old = node.difficulty_history();
        node.set_difficulty_history(vec![PowDifficulty {
            timestamp_ms: 10,
            difficulty: 2,
        }]);
        assert!(old.is_empty());
        assert_eq!(node.difficulty_history().len(), 1);
        assert_eq!(node.curr_pow_difficulty(), 2);
    }

    #[test]
    fn current_difficulty_tracks_newest_entry() {
        let node = ServiceNode::new();
        node.set_difficulty_history(vec![
            PowDifficulty { timestamp_ms: 100, difficulty: 7 },
            PowDifficulty { timestamp_ms: 300, difficulty: 3 },
            PowDifficulty { timestamp_ms: 200, difficulty: 9 },
        ]);
        assert_eq!(node.curr_pow_difficulty(), 3);
    }

    #[test]
    fn stats_blob_contains_counters() {
        let node = ServiceNode::new();
        node.bump_rpc_requests();
        node.update_last_ping();
        let stats: serde_json::Value = serde_json::from_str(&node.get_stats()).unwrap();
        assert_eq!(stats["rpc_requests"], 1);
        assert_eq!(stats["version"], env!("CARGO_PKG_VERSION"));
        assert!(stats["last_reachable_ms"].as_u64().unwrap() > 0);
    }
}
