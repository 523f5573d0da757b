//! Validation Engine - three sequential tiers per sampled bucket.
//!
//! 1. [`QuantityCheck`]: the bucket exists and matches its claimed totals
//! 2. [`StructureCheck`]: each sampled entity is well-formed
//! 3. [`GroundTruthCheck`]: each well-formed entity agrees with ground truth
//!
//! Tiers short-circuit per entity. A Tier 1 failure stops the whole bucket;
//! later failures only affect their own entity and never abort the batch.

mod tier1;
mod tier2;
mod tier3;

pub use tier1::QuantityCheck;
pub use tier2::StructureCheck;
pub use tier3::GroundTruthCheck;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use claims::{Bucket, Entity, Equivalence, EquivalenceKey, PeerId};
use oracle::{GroundTruthVerifier, PeerTransport, SchemaCatalog};

use crate::config::{OutcomeBasis, SamplingConfig, ValidationConfig};
use crate::sampler::{SampleSeed, Sampler};
use crate::types::{FailureReason, ValidationOutcome};

/// Outcome of validating one sampled bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketValidation {
    /// Bucket that was sampled
    pub bucket: Bucket,
    /// One outcome per sampled entity
    pub outcomes: Vec<ValidationOutcome>,
    /// Set when Tier 1 rejected the bucket
    pub tier1_failure: Option<FailureReason>,
    /// Keys of every entity the bucket holds, sampled or not.
    /// Empty when Tier 1 rejected the bucket.
    pub claimed_keys: BTreeSet<EquivalenceKey>,
    /// Entities that passed every tier
    pub validated: Vec<Entity>,
}

impl BucketValidation {
    fn rejected(bucket: Bucket, reason: FailureReason) -> Self {
        Self {
            bucket,
            outcomes: Vec::new(),
            tier1_failure: Some(reason),
            claimed_keys: BTreeSet::new(),
            validated: Vec::new(),
        }
    }

    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_valid).count()
    }

    /// Fraction of the sample that passed, by entity count or by bytes.
    ///
    /// A Tier 1 failure or an empty sample yields 0.0.
    pub fn outcome_fraction(&self, basis: OutcomeBasis) -> f64 {
        if self.tier1_failure.is_some() || self.outcomes.is_empty() {
            return 0.0;
        }
        let by_entities = self.passed() as f64 / self.outcomes.len() as f64;
        match basis {
            OutcomeBasis::Entities => by_entities,
            OutcomeBasis::Bytes => {
                let claimed: u64 = self.outcomes.iter().map(|o| o.claimed_bytes).sum();
                if claimed == 0 {
                    return by_entities;
                }
                let passed: u64 = self.outcomes.iter().map(|o| o.bytes_validated).sum();
                passed as f64 / claimed as f64
            }
        }
    }
}

/// Runs the three tiers against one peer's sampled bucket.
pub struct ValidationEngine {
    transport: Arc<dyn PeerTransport>,
    ground_truth: Arc<dyn GroundTruthVerifier>,
    schemas: Arc<SchemaCatalog>,
    sampler: Sampler,
    equivalence: Equivalence,
    quantity: QuantityCheck,
    structure: StructureCheck,
    accuracy: GroundTruthCheck,
}

impl ValidationEngine {
    pub fn new(
        validation: &ValidationConfig,
        sampling: &SamplingConfig,
        transport: Arc<dyn PeerTransport>,
        ground_truth: Arc<dyn GroundTruthVerifier>,
        schemas: Arc<SchemaCatalog>,
    ) -> Self {
        Self {
            transport,
            ground_truth,
            schemas,
            sampler: Sampler::new(sampling.samples_per_peer),
            equivalence: Equivalence::default(),
            quantity: QuantityCheck {
                width_secs: sampling.time_bucket_width_secs,
                size_tolerance: validation.size_tolerance,
                max_bucket_size_bytes: sampling.max_bucket_size_bytes,
                timeout: validation.bucket_timeout(),
            },
            structure: StructureCheck {
                max_clock_skew_secs: validation.max_clock_skew_secs,
            },
            accuracy: GroundTruthCheck {
                timeout: validation.lookup_timeout(),
                retry: validation.retry_policy(),
                tolerances: validation.tolerances,
            },
        }
    }

    /// Relation used to key the bucket's claimed entities.
    pub fn with_equivalence(mut self, equivalence: Equivalence) -> Self {
        self.equivalence = equivalence;
        self
    }

    /// Validate one sampled bucket of `peer`.
    ///
    /// Every sampled entity yields an outcome; entities are checked
    /// concurrently, tiers within an entity strictly in order.
    pub async fn validate_bucket(
        &self,
        peer: &PeerId,
        bucket: &Bucket,
        seed: &SampleSeed,
        now: DateTime<Utc>,
    ) -> BucketValidation {
        let entities = match self.quantity.run(self.transport.as_ref(), peer, bucket).await {
            Ok(entities) => entities,
            Err(reason) => {
                info!(
                    peer_id = %peer,
                    bucket = ?bucket.id,
                    reason = ?reason,
                    "Bucket failed tier 1"
                );
                return BucketValidation::rejected(bucket.clone(), reason);
            }
        };

        let claimed_keys = entities.iter().map(|e| self.equivalence.key_for(e)).collect();
        let by_uri: HashMap<&str, &Entity> =
            entities.iter().map(|e| (e.uri.as_str(), e)).collect();
        let sampled: Vec<&Entity> = self
            .sampler
            .select_entities(&entities, seed)
            .iter()
            .filter_map(|uri| by_uri.get(uri.as_str()).copied())
            .collect();

        let outcomes = join_all(sampled.iter().map(|entity| self.validate_entity(entity, now))).await;

        let validated = sampled
            .iter()
            .zip(&outcomes)
            .filter(|(_, outcome)| outcome.is_valid)
            .map(|(entity, _)| (*entity).clone())
            .collect();

        let result = BucketValidation {
            bucket: bucket.clone(),
            outcomes,
            tier1_failure: None,
            claimed_keys,
            validated,
        };
        debug!(
            peer_id = %peer,
            sampled = result.outcomes.len(),
            passed = result.passed(),
            "Bucket validated"
        );
        result
    }

    /// Tier 2 then Tier 3 for one entity.
    async fn validate_entity(&self, entity: &Entity, now: DateTime<Utc>) -> ValidationOutcome {
        let claimed = match self.structure.check(entity, &self.schemas, now) {
            Ok(fields) => fields,
            Err(reason) => return ValidationOutcome::failed(entity, reason),
        };

        // Tier 2 guarantees a schema exists for the source.
        let Some(schema) = self.schemas.get(entity.source) else {
            return ValidationOutcome::failed(entity, FailureReason::malformed("no schema"));
        };

        match self
            .accuracy
            .check(self.ground_truth.as_ref(), schema, entity, &claimed)
            .await
        {
            Ok(()) => ValidationOutcome::passed(entity),
            Err(reason) => {
                debug!(uri = %entity.uri, reason = ?reason, "Entity failed tier 3");
                ValidationOutcome::failed(entity, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{DataLabel, DataSource, PeerIndex};
    use oracle::mock::{MockGroundTruth, MockTransport};
    use serde_json::json;

    fn posts(count: usize) -> Vec<Entity> {
        let hour = Utc::now() - chrono::Duration::hours(3);
        (0..count)
            .map(|i| {
                let content = json!({
                    "id": format!("t3_{}", i), "community": "r/rust", "username": "ferris",
                    "body": format!("post {}", i), "data_type": "post"
                });
                Entity::new(
                    format!("https://reddit.com/r/rust/comments/{}", i),
                    hour,
                    DataSource::Reddit,
                    Some(DataLabel::new("r/rust").unwrap()),
                    serde_json::to_vec(&content).unwrap(),
                )
            })
            .collect()
    }

    fn engine(
        transport: Arc<MockTransport>,
        truth: Arc<MockGroundTruth>,
        samples: usize,
    ) -> ValidationEngine {
        let mut validation = ValidationConfig::default();
        validation.retry_delay_ms = 1;
        let sampling = SamplingConfig {
            samples_per_peer: samples,
            ..SamplingConfig::default()
        };
        ValidationEngine::new(
            &validation,
            &sampling,
            transport,
            truth,
            Arc::new(SchemaCatalog::default()),
        )
    }

    fn first_bucket(entities: &[Entity]) -> Bucket {
        PeerIndex::from_entities(PeerId::from("peer-a"), entities, 3600, Utc::now()).buckets[0]
            .clone()
    }

    #[tokio::test]
    async fn test_all_pass() {
        let entities = posts(8);
        let transport = Arc::new(MockTransport::new(3600).with_peer("peer-a", entities.clone()));
        let truth = Arc::new(MockGroundTruth::default().with_entities(&entities));
        let engine = engine(transport, truth, 5);

        let peer = PeerId::from("peer-a");
        let result = engine
            .validate_bucket(&peer, &first_bucket(&entities), &SampleSeed::derive(&peer, 1), Utc::now())
            .await;

        assert_eq!(result.outcomes.len(), 5);
        assert_eq!(result.validated.len(), 5);
        // the whole bucket is claimed even though only five were sampled
        assert_eq!(result.claimed_keys.len(), 8);
        assert_eq!(result.outcome_fraction(OutcomeBasis::Entities), 1.0);
        assert_eq!(result.outcome_fraction(OutcomeBasis::Bytes), 1.0);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_going() {
        let entities = posts(4);
        let transport = Arc::new(MockTransport::new(3600).with_peer("peer-a", entities.clone()));
        // Ground truth only knows half the records.
        let truth = Arc::new(MockGroundTruth::default().with_entities(&entities[..2]));
        let engine = engine(transport, truth, 4);

        let peer = PeerId::from("peer-a");
        let result = engine
            .validate_bucket(&peer, &first_bucket(&entities), &SampleSeed::derive(&peer, 1), Utc::now())
            .await;

        assert_eq!(result.outcomes.len(), 4);
        assert_eq!(result.passed(), 2);
        assert_eq!(result.outcome_fraction(OutcomeBasis::Entities), 0.5);
        assert!(result
            .outcomes
            .iter()
            .filter(|o| !o.is_valid)
            .all(|o| o.reason == Some(FailureReason::NotFoundInGroundTruth) && o.bytes_validated == 0));
    }

    #[tokio::test]
    async fn test_tier1_failure_stops_bucket() {
        let entities = posts(4);
        let transport = Arc::new(MockTransport::new(3600).with_peer("peer-a", entities.clone()));
        let truth = Arc::new(MockGroundTruth::default().with_entities(&entities));
        let engine = engine(transport, truth.clone(), 4);

        let mut bucket = first_bucket(&entities);
        bucket.total_size_bytes *= 3;

        let peer = PeerId::from("peer-a");
        let result = engine
            .validate_bucket(&peer, &bucket, &SampleSeed::derive(&peer, 1), Utc::now())
            .await;

        assert!(matches!(result.tier1_failure, Some(FailureReason::InconsistentIndex { .. })));
        assert!(result.outcomes.is_empty());
        assert!(result.claimed_keys.is_empty());
        assert_eq!(result.outcome_fraction(OutcomeBasis::Entities), 0.0);
        assert_eq!(truth.call_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_entity_skips_ground_truth() {
        let mut entities = posts(1);
        entities[0].content_size_bytes += 5;
        let transport = Arc::new(MockTransport::new(3600).with_peer("peer-a", entities.clone()));
        let truth = Arc::new(MockGroundTruth::default().with_entities(&entities));
        let engine = engine(transport, truth.clone(), 1);

        let peer = PeerId::from("peer-a");
        let bucket = first_bucket(&entities);
        let result = engine
            .validate_bucket(&peer, &bucket, &SampleSeed::derive(&peer, 1), Utc::now())
            .await;

        assert!(matches!(
            result.outcomes[0].reason,
            Some(FailureReason::MalformedEntity { .. })
        ));
        assert_eq!(truth.call_count(), 0);
    }
}
