//! Scorer: turns validated entities into per-peer scores and reward shares.
//!
//! ```text
//! scorable_bytes  = content_size_bytes / peers claiming an equivalent entity
//! raw             = Σ source_weight × label_weight × time_scalar × scorable_bytes
//! boost           = min(max_boost, per_byte × bytes_confirmed × (1 − dup_rate))
//!                   × storage_credibility^p            (only when raw > 0)
//! final           = raw × credibility^p + boost
//! share           = final / Σ final
//! ```
//!
//! Uniqueness needs the full cross-peer view, so scoring only runs once
//! every peer of the cycle has been evaluated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use claims::{DesirabilityTable, Equivalence, EquivalenceKey, PeerId};
use oracle::IncentiveShares;

use crate::config::ValidatorConfig;
use crate::types::PeerCycleResult;

/// Error types for scoring.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoringError {
    /// A score term came out NaN or infinite
    #[error("Non-finite {term} for peer {peer}")]
    NonFinite { peer: PeerId, term: &'static str },

    /// Sum of final scores is not finite
    #[error("Non-finite score total")]
    NonFiniteTotal,
}

/// Score breakdown for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PeerScore {
    /// Uniqueness-discounted bytes before weights
    pub scorable_bytes: f64,
    /// Weighted score before credibility
    pub raw: f64,
    /// Credibility used
    pub credibility: f64,
    /// Storage audit boost
    pub boost: f64,
    /// `raw × credibility^p + boost`
    pub final_score: f64,
    /// Share of the reward pool
    pub share: f64,
}

/// All peer scores of one cycle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreTable {
    pub cycle_id: u64,
    pub peers: BTreeMap<PeerId, PeerScore>,
}

impl ScoreTable {
    pub fn get(&self, peer: &PeerId) -> Option<&PeerScore> {
        self.peers.get(peer)
    }

    /// Share table for the weight sink.
    pub fn shares(&self) -> IncentiveShares {
        IncentiveShares::new(
            self.cycle_id,
            self.peers
                .iter()
                .map(|(peer, score)| (peer.clone(), score.share))
                .collect(),
        )
    }

    pub fn total_final(&self) -> f64 {
        self.peers.values().map(|s| s.final_score).sum()
    }
}

/// Number of distinct peers claiming each equivalence key.
///
/// Claims are the whole bucket a peer served, not just its sample, so two
/// peers holding the same data split it whichever entities each sampled.
/// A peer counts once per key however many times it claims it.
pub fn uniqueness_counts(
    results: &[PeerCycleResult],
    relation: Equivalence,
) -> HashMap<EquivalenceKey, usize> {
    let mut counts = HashMap::new();
    for result in results {
        let mut keys = result.claimed_keys.clone();
        keys.extend(result.validated.iter().map(|e| relation.key_for(e)));
        for key in keys {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    counts
}

/// Byte credit of one claim shared by `claimants` peers.
pub fn scorable_bytes(size_bytes: u64, claimants: usize) -> f64 {
    size_bytes as f64 / claimants.max(1) as f64
}

/// Combines validated bytes, weights and credibility into shares.
#[derive(Debug, Clone)]
pub struct Scorer {
    desirability: DesirabilityTable,
    equivalence: Equivalence,
    exponent: f64,
    storage_boost_per_byte: f64,
    max_storage_boost: f64,
}

impl Scorer {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            desirability: config.desirability.clone(),
            equivalence: config.scoring.equivalence,
            exponent: config.credibility.exponent,
            storage_boost_per_byte: config.scoring.storage_boost_per_byte,
            max_storage_boost: config.scoring.max_storage_boost,
        }
    }

    /// Score every peer of a cycle.
    ///
    /// Pure: the same results and `now` always give the same table.
    pub fn score(
        &self,
        cycle_id: u64,
        results: &[PeerCycleResult],
        now: DateTime<Utc>,
    ) -> Result<ScoreTable, ScoringError> {
        let counts = uniqueness_counts(results, self.equivalence);

        let mut peers = BTreeMap::new();
        for result in results {
            let score = self.score_peer(result, &counts, now)?;
            peers.insert(result.peer_id.clone(), score);
        }

        let total: f64 = peers.values().map(|s: &PeerScore| s.final_score).sum();
        if !total.is_finite() {
            return Err(ScoringError::NonFiniteTotal);
        }
        if total > 0.0 {
            for score in peers.values_mut() {
                score.share = score.final_score / total;
            }
        }

        Ok(ScoreTable { cycle_id, peers })
    }

    fn score_peer(
        &self,
        result: &PeerCycleResult,
        counts: &HashMap<EquivalenceKey, usize>,
        now: DateTime<Utc>,
    ) -> Result<PeerScore, ScoringError> {
        let credibility = result.credibility;

        if !result.responsive {
            return Ok(PeerScore {
                credibility,
                ..PeerScore::default()
            });
        }

        let mut seen = BTreeSet::new();
        let mut total_scorable = 0.0;
        let mut raw = 0.0;
        for entity in &result.validated {
            let key = self.equivalence.key_for(entity);
            let claimants = counts.get(&key).copied().unwrap_or(1);
            if !seen.insert(key) {
                continue;
            }
            let bytes = scorable_bytes(entity.content_size_bytes, claimants);
            total_scorable += bytes;
            raw += self.desirability.entity_weight(entity, now) * bytes;
        }
        check_finite(&result.peer_id, "raw score", raw)?;

        let boost = if raw > 0.0 {
            self.storage_boost(result)
        } else {
            0.0
        };
        check_finite(&result.peer_id, "storage boost", boost)?;

        let final_score = raw * credibility.powf(self.exponent) + boost;
        check_finite(&result.peer_id, "final score", final_score)?;

        Ok(PeerScore {
            scorable_bytes: total_scorable,
            raw,
            credibility,
            boost,
            final_score,
            share: 0.0,
        })
    }

    fn storage_boost(&self, result: &PeerCycleResult) -> f64 {
        let Some(report) = result.storage_report else {
            return 0.0;
        };
        let earned = self.storage_boost_per_byte * report.bytes_confirmed as f64 * report.quality();
        earned.min(self.max_storage_boost) * result.storage_credibility.powf(self.exponent)
    }
}

fn check_finite(peer: &PeerId, term: &'static str, value: f64) -> Result<(), ScoringError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ScoringError::NonFinite {
            peer: peer.clone(),
            term,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{DataSource, Entity};
    use oracle::BulkClaimReport;

    fn entity(uri: &str, size: usize) -> Entity {
        Entity::new(uri, Utc::now(), DataSource::Zillow, None, vec![b'z'; size])
    }

    fn result(peer: &str, validated: Vec<Entity>, credibility: f64) -> PeerCycleResult {
        PeerCycleResult {
            validated,
            ..PeerCycleResult::empty(PeerId::from(peer), true, credibility)
        }
    }

    fn claiming(mut result: PeerCycleResult, claimed: &[Entity]) -> PeerCycleResult {
        result.claimed_keys = claimed
            .iter()
            .map(|e| Equivalence::NaturalKey.key_for(e))
            .collect();
        result
    }

    fn scorer() -> Scorer {
        let config = ValidatorConfig::default()
            .with_desirability(DesirabilityTable::uniform(30 * 24 * 3600));
        Scorer::new(&config)
    }

    #[test]
    fn test_sole_contributor_gets_everything() {
        let results = vec![result("a", vec![entity("u1", 100), entity("u2", 50)], 1.0)];
        let table = scorer().score(1, &results, Utc::now()).unwrap();

        let score = table.get(&PeerId::from("a")).unwrap();
        assert!((score.raw - 150.0).abs() < 1e-6);
        assert_eq!(score.share, 1.0);
    }

    #[test]
    fn test_shared_entities_split_credit() {
        let shared = vec![entity("u1", 100), entity("u2", 100)];
        let results = vec![
            result("a", shared.clone(), 1.0),
            result("b", shared, 1.0),
        ];
        let table = scorer().score(1, &results, Utc::now()).unwrap();

        for peer in ["a", "b"] {
            let score = table.get(&PeerId::from(peer)).unwrap();
            assert!((score.scorable_bytes - 100.0).abs() < 1e-9);
            assert!((score.share - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_unsampled_claims_still_split_credit() {
        let bucket: Vec<Entity> = (0..6).map(|i| entity(&format!("u{}", i), 40)).collect();
        // both hold the same six entities but validated disjoint samples
        let results = vec![
            claiming(result("a", bucket[..3].to_vec(), 1.0), &bucket),
            claiming(result("b", bucket[3..].to_vec(), 1.0), &bucket),
        ];

        let counts = uniqueness_counts(&results, Equivalence::NaturalKey);
        assert_eq!(counts.len(), 6);
        assert!(counts.values().all(|&c| c == 2));

        let table = scorer().score(1, &results, Utc::now()).unwrap();
        for peer in ["a", "b"] {
            let score = table.get(&PeerId::from(peer)).unwrap();
            assert!((score.scorable_bytes - 60.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_credit_is_conserved_across_three_claimants() {
        let shared = entity("u1", 99);
        let results = vec![
            result("a", vec![shared.clone()], 1.0),
            result("b", vec![shared.clone()], 0.6),
            result("c", vec![shared.clone(), shared.clone()], 0.3),
        ];
        let table = scorer().score(1, &results, Utc::now()).unwrap();

        let total: f64 = table.peers.values().map(|s| s.scorable_bytes).sum();
        assert!((total - 99.0).abs() < 1e-9);
        for score in table.peers.values() {
            assert!((score.scorable_bytes - 33.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_within_peer_duplicates_count_once() {
        let results = vec![result(
            "a",
            vec![entity("u1", 100), entity("u1/", 100), entity("u2", 10)],
            1.0,
        )];
        let counts = uniqueness_counts(&results, Equivalence::NaturalKey);
        assert!(counts.values().all(|&c| c == 1));

        let table = scorer().score(1, &results, Utc::now()).unwrap();
        assert!((table.get(&PeerId::from("a")).unwrap().scorable_bytes - 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_credibility_exponent() {
        let results = vec![
            result("trusted", vec![entity("u1", 100)], 1.0),
            result("new", vec![entity("u2", 100)], 0.5),
        ];
        let table = scorer().score(1, &results, Utc::now()).unwrap();

        let new = table.get(&PeerId::from("new")).unwrap();
        assert!((new.final_score - 100.0 * 0.5f64.powf(2.5)).abs() < 1e-9);
        assert!((table.shares().total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_all_zero_scores_give_zero_shares() {
        let results = vec![
            result("a", vec![], 1.0),
            PeerCycleResult::empty(PeerId::from("b"), false, 0.7),
        ];
        let table = scorer().score(1, &results, Utc::now()).unwrap();
        assert!(table.peers.values().all(|s| s.share == 0.0));
        assert_eq!(table.peers.len(), 2);
    }

    #[test]
    fn test_storage_boost_needs_primary_score() {
        let report = BulkClaimReport {
            bytes_confirmed: 1_000,
            duplicate_rate: 0.5,
        };
        let mut with_data = result("a", vec![entity("u1", 100)], 1.0);
        with_data.storage_report = Some(report);
        with_data.storage_credibility = 1.0;

        let mut without_data = result("b", vec![], 1.0);
        without_data.storage_report = Some(report);
        without_data.storage_credibility = 1.0;

        let table = scorer()
            .score(1, &[with_data, without_data], Utc::now())
            .unwrap();
        assert!((table.get(&PeerId::from("a")).unwrap().boost - 5.0).abs() < 1e-9);
        assert_eq!(table.get(&PeerId::from("b")).unwrap().boost, 0.0);
    }

    #[test]
    fn test_non_finite_credibility_is_fatal() {
        let results = vec![result("a", vec![entity("u1", 100)], f64::NAN)];
        assert!(matches!(
            scorer().score(1, &results, Utc::now()),
            Err(ScoringError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let now = Utc::now();
        let results = vec![
            result("a", vec![entity("u1", 100), entity("u2", 30)], 0.9),
            result("b", vec![entity("u2", 30), entity("u3", 70)], 0.4),
        ];
        let first = scorer().score(4, &results, now).unwrap();
        let second = scorer().score(4, &results, now).unwrap();
        assert_eq!(first, second);
    }
}
