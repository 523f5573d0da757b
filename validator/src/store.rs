//! Peer Index Store: last reported index per peer.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use claims::{PeerId, PeerIndex};

/// What the store knows about one peer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerEntry {
    /// Last index the peer reported, kept across unreachable cycles
    pub index: Option<PeerIndex>,
    /// Whether the last refresh succeeded
    pub responsive: bool,
    /// When the last successful refresh happened
    pub last_refreshed: Option<DateTime<Utc>>,
    /// When the peer was last evaluated, successful or not
    pub last_evaluated: Option<DateTime<Utc>>,
    /// Refresh failures since the last success
    pub consecutive_failures: u32,
    /// Error from the last failed refresh
    pub last_error: Option<String>,
}

/// Keyed store of peer indexes.
///
/// Writers for different peers never contend; callers serialize writers of
/// the same peer with [`PeerLocks`].
pub struct PeerIndexStore {
    entries: DashMap<PeerId, PeerEntry>,
    max_buckets: usize,
}

impl PeerIndexStore {
    pub fn new(max_buckets: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_buckets,
        }
    }

    /// Start tracking a peer. Returns false if it was already known.
    pub fn register(&self, peer: PeerId) -> bool {
        let mut inserted = false;
        self.entries.entry(peer).or_insert_with(|| {
            inserted = true;
            PeerEntry::default()
        });
        inserted
    }

    /// Replace the peer's index wholesale and mark it responsive.
    ///
    /// Indexes with more buckets than allowed keep only the largest ones.
    pub fn record_refresh(&self, mut index: PeerIndex, at: DateTime<Utc>) -> PeerIndex {
        let dropped = index.truncate_to_largest(self.max_buckets);
        if dropped > 0 {
            warn!(
                peer_id = %index.peer_id,
                dropped,
                kept = index.buckets.len(),
                "Peer index exceeds bucket limit, truncated"
            );
        }

        debug!(
            peer_id = %index.peer_id,
            buckets = index.buckets.len(),
            claimed_bytes = index.total_claimed_bytes,
            "Index refreshed"
        );

        let mut entry = self.entries.entry(index.peer_id.clone()).or_default();
        entry.index = Some(index.clone());
        entry.responsive = true;
        entry.last_refreshed = Some(at);
        entry.consecutive_failures = 0;
        entry.last_error = None;
        index
    }

    /// Flag the peer non-responsive, keeping its last-known index.
    pub fn mark_unreachable(&self, peer: &PeerId, error: impl Into<String>) -> u32 {
        let mut entry = self.entries.entry(peer.clone()).or_default();
        entry.responsive = false;
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.last_error = Some(error.into());
        entry.consecutive_failures
    }

    pub fn mark_evaluated(&self, peer: &PeerId, at: DateTime<Utc>) {
        if let Some(mut entry) = self.entries.get_mut(peer) {
            entry.last_evaluated = Some(at);
        }
    }

    /// Last-known index of a peer.
    pub fn get(&self, peer: &PeerId) -> Option<PeerIndex> {
        self.entries.get(peer).and_then(|e| e.index.clone())
    }

    pub fn entry(&self, peer: &PeerId) -> Option<PeerEntry> {
        self.entries.get(peer).map(|e| e.value().clone())
    }

    pub fn is_responsive(&self, peer: &PeerId) -> bool {
        self.entries.get(peer).map(|e| e.responsive).unwrap_or(false)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.entries.contains_key(peer)
    }

    /// All known peers, sorted.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.entries.iter().map(|e| e.key().clone()).collect();
        peers.sort();
        peers
    }

    /// Peers not evaluated within `min_interval` of `now`, sorted.
    pub fn due_peers(&self, now: DateTime<Utc>, min_interval: Duration) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .entries
            .iter()
            .filter(|e| match e.last_evaluated {
                Some(at) => now - at >= min_interval,
                None => true,
            })
            .map(|e| e.key().clone())
            .collect();
        peers.sort();
        peers
    }

    /// Drop a peer and its index.
    pub fn remove(&self, peer: &PeerId) -> Option<PeerEntry> {
        self.entries.remove(peer).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-peer async locks: at most one evaluation of a given peer at a time,
/// with no locking across peers.
#[derive(Default)]
pub struct PeerLocks {
    locks: DashMap<PeerId, Arc<Mutex<()>>>,
}

impl PeerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `peer`.
    pub async fn lock(&self, peer: &PeerId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(peer.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub fn remove(&self, peer: &PeerId) {
        self.locks.remove(peer);
    }
}
