//! Credibility Tracker: slow-moving trust per peer.
//!
//! Each validation batch moves a peer's credibility a fraction `alpha` of
//! the way toward the batch outcome:
//!
//! ```text
//! c' = clamp(c + alpha × (outcome − c), 0, 1)
//! ```
//!
//! One bad cycle dents a long-trusted peer; sustained failure decays it
//! toward zero over several cycles.

use dashmap::DashMap;
use std::collections::BTreeMap;
use tracing::debug;

use claims::PeerId;

/// EMA credibility per peer.
pub struct CredibilityTracker {
    alpha: f64,
    initial: f64,
    scores: DashMap<PeerId, f64>,
}

impl CredibilityTracker {
    /// Create a tracker with learning rate `alpha`; unknown peers start at `initial`.
    pub fn new(alpha: f64, initial: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            initial: initial.clamp(0.0, 1.0),
            scores: DashMap::new(),
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn initial(&self) -> f64 {
        self.initial
    }

    /// Current credibility, `initial` for peers never seen.
    pub fn get(&self, peer: &PeerId) -> f64 {
        self.scores.get(peer).map(|c| *c).unwrap_or(self.initial)
    }

    /// Fold one batch outcome into the peer's credibility.
    ///
    /// Non-finite outcomes count as total failure. Returns the new value.
    pub fn update(&self, peer: &PeerId, outcome: f64) -> f64 {
        let outcome = if outcome.is_finite() {
            outcome.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut score = self.scores.entry(peer.clone()).or_insert(self.initial);
        let previous = *score;
        let updated = (previous + self.alpha * (outcome - previous)).clamp(0.0, 1.0);
        *score = updated;

        debug!(
            peer_id = %peer,
            outcome,
            previous,
            credibility = updated,
            "Credibility updated"
        );
        updated
    }

    /// Administrative reset back to the starting value.
    pub fn reset(&self, peer: &PeerId) {
        self.scores.insert(peer.clone(), self.initial);
    }

    /// Forget a peer entirely.
    pub fn remove(&self, peer: &PeerId) {
        self.scores.remove(peer);
    }

    pub fn snapshot(&self) -> BTreeMap<PeerId, f64> {
        self.scores
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Replace all state with a snapshot. Values are clamped to `[0, 1]`.
    pub fn restore(&self, snapshot: &BTreeMap<PeerId, f64>) {
        self.scores.clear();
        for (peer, value) in snapshot {
            let value = if value.is_finite() {
                value.clamp(0.0, 1.0)
            } else {
                self.initial
            };
            self.scores.insert(peer.clone(), value);
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_peer_starts_at_initial() {
        let tracker = CredibilityTracker::new(0.15, 0.1);
        assert_eq!(tracker.get(&PeerId::from("new")), 0.1);
    }

    #[test]
    fn test_ema_update() {
        let tracker = CredibilityTracker::new(0.15, 0.0);
        let peer = PeerId::from("peer-a");

        let first = tracker.update(&peer, 1.0);
        assert!((first - 0.15).abs() < 1e-12);

        let second = tracker.update(&peer, 1.0);
        assert!((second - (0.15 + 0.15 * 0.85)).abs() < 1e-12);
    }

    #[test]
    fn test_sustained_failure_decays() {
        let tracker = CredibilityTracker::new(0.15, 0.0);
        let peer = PeerId::from("peer-a");
        tracker.restore(&BTreeMap::from([(peer.clone(), 0.8)]));

        for _ in 0..3 {
            tracker.update(&peer, 0.0);
        }
        let expected = 0.8 * 0.85f64.powi(3);
        assert!((tracker.get(&peer) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_bounds_and_bad_input() {
        let tracker = CredibilityTracker::new(1.0, 0.5);
        let peer = PeerId::from("peer-a");

        assert_eq!(tracker.update(&peer, 7.0), 1.0);
        assert_eq!(tracker.update(&peer, f64::NAN), 0.0);
        assert_eq!(tracker.update(&peer, -3.0), 0.0);
    }

    #[test]
    fn test_reset_and_snapshot() {
        let tracker = CredibilityTracker::new(0.5, 0.0);
        let peer = PeerId::from("peer-a");
        tracker.update(&peer, 1.0);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.get(&peer), Some(&0.5));

        tracker.reset(&peer);
        assert_eq!(tracker.get(&peer), 0.0);

        tracker.restore(&snapshot);
        assert_eq!(tracker.get(&peer), 0.5);
    }
}
