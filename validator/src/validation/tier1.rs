//! Tier 1: quantity and timeliness of a sampled bucket.
//!
//! Cheap checks that catch gross misreporting. A failure here invalidates
//! the whole bucket and nothing proceeds to Tier 2.

use std::collections::HashSet;
use std::time::Duration;

use claims::{Bucket, Entity, PeerId};
use oracle::PeerTransport;

use crate::types::{FailureReason, Stage};

/// Bucket fetch plus consistency checks against the claimed totals.
#[derive(Debug, Clone)]
pub struct QuantityCheck {
    /// Time bucket width (seconds)
    pub width_secs: u64,
    /// Allowed relative gap between claimed and actual totals
    pub size_tolerance: f64,
    /// Largest bucket a peer may claim (bytes)
    pub max_bucket_size_bytes: u64,
    /// Bucket fetch timeout
    pub timeout: Duration,
}

impl QuantityCheck {
    /// Fetch the bucket's entities and check them against the claim.
    pub async fn run(
        &self,
        transport: &dyn PeerTransport,
        peer: &PeerId,
        bucket: &Bucket,
    ) -> Result<Vec<Entity>, FailureReason> {
        if bucket.entity_count == 0 {
            return Err(FailureReason::inconsistent("bucket claims zero entities"));
        }
        if bucket.total_size_bytes > self.max_bucket_size_bytes {
            return Err(FailureReason::inconsistent(format!(
                "bucket claims {} bytes, limit is {}",
                bucket.total_size_bytes, self.max_bucket_size_bytes
            )));
        }

        let entities = match tokio::time::timeout(
            self.timeout,
            transport.get_bucket_entities(peer, &bucket.id),
        )
        .await
        {
            Ok(Ok(entities)) => entities,
            Ok(Err(_)) => return Err(FailureReason::Unreachable),
            Err(_) => {
                return Err(FailureReason::Timeout {
                    stage: Stage::Tier1,
                })
            }
        };

        self.check(bucket, &entities)?;
        Ok(entities)
    }

    /// Consistency of returned entities with the bucket claim.
    pub fn check(&self, bucket: &Bucket, entities: &[Entity]) -> Result<(), FailureReason> {
        if entities.is_empty() {
            return Err(FailureReason::inconsistent("peer returned no entities"));
        }

        let mut seen = HashSet::with_capacity(entities.len());
        for entity in entities {
            if !seen.insert(entity.uri.as_str()) {
                return Err(FailureReason::inconsistent(format!(
                    "duplicate uri {}",
                    entity.uri
                )));
            }
            if entity.source != bucket.id.source || entity.label != bucket.id.label {
                return Err(FailureReason::inconsistent(format!(
                    "{} does not belong to the bucket's source or label",
                    entity.uri
                )));
            }
            if !bucket.id.time_bucket.contains(entity.timestamp, self.width_secs) {
                return Err(FailureReason::inconsistent(format!(
                    "{} timestamp {} outside bucket window",
                    entity.uri, entity.timestamp
                )));
            }
        }

        let count_gap = relative_gap(bucket.entity_count, entities.len() as u64);
        if count_gap > self.size_tolerance {
            return Err(FailureReason::inconsistent(format!(
                "claimed {} entities, returned {}",
                bucket.entity_count,
                entities.len()
            )));
        }

        let actual_bytes = entities
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(e.content.len() as u64));
        let size_gap = relative_gap(bucket.total_size_bytes, actual_bytes);
        if size_gap > self.size_tolerance {
            return Err(FailureReason::inconsistent(format!(
                "claimed {} bytes, returned {}",
                bucket.total_size_bytes, actual_bytes
            )));
        }

        Ok(())
    }
}

/// `|claimed - actual| / claimed`, with an empty claim only matching an empty result.
fn relative_gap(claimed: u64, actual: u64) -> f64 {
    if claimed == 0 {
        return if actual == 0 { 0.0 } else { f64::INFINITY };
    }
    claimed.abs_diff(actual) as f64 / claimed as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use claims::{BucketId, DataLabel, DataSource, PeerIndex};
    use oracle::mock::MockTransport;

    const WIDTH: u64 = 3600;

    fn check() -> QuantityCheck {
        QuantityCheck {
            width_secs: WIDTH,
            size_tolerance: 0.10,
            max_bucket_size_bytes: 1024 * 1024,
            timeout: Duration::from_millis(100),
        }
    }

    fn post(id: usize, size: usize) -> Entity {
        Entity::new(
            format!("https://reddit.com/r/rust/comments/{}", id),
            Utc.with_ymd_and_hms(2026, 10, 1, 12, 10, 0).unwrap(),
            DataSource::Reddit,
            Some(DataLabel::new("r/rust").unwrap()),
            vec![b'a'; size],
        )
    }

    fn bucket_for(entities: &[Entity]) -> Bucket {
        PeerIndex::from_entities(PeerId::from("peer-a"), entities, WIDTH, Utc::now()).buckets[0]
            .clone()
    }

    #[test]
    fn test_consistent_bucket_passes() {
        let entities: Vec<Entity> = (0..4).map(|i| post(i, 100)).collect();
        let bucket = bucket_for(&entities);
        assert_eq!(check().check(&bucket, &entities), Ok(()));
    }

    #[test]
    fn test_inflated_size_fails() {
        let entities: Vec<Entity> = (0..4).map(|i| post(i, 100)).collect();
        let mut bucket = bucket_for(&entities);
        bucket.total_size_bytes *= 3;
        assert!(matches!(
            check().check(&bucket, &entities),
            Err(FailureReason::InconsistentIndex { .. })
        ));
    }

    #[test]
    fn test_small_size_drift_tolerated() {
        let entities: Vec<Entity> = (0..10).map(|i| post(i, 100)).collect();
        let mut bucket = bucket_for(&entities);
        bucket.total_size_bytes += 50;
        assert!(check().check(&bucket, &entities).is_ok());
    }

    #[test]
    fn test_entity_outside_window_fails() {
        let mut entities: Vec<Entity> = (0..3).map(|i| post(i, 100)).collect();
        let bucket = bucket_for(&entities);
        entities[1].timestamp = entities[1].timestamp + ChronoDuration::hours(2);
        assert!(check().check(&bucket, &entities).is_err());
    }

    #[test]
    fn test_duplicate_uri_fails() {
        let entities = vec![post(1, 100), post(1, 100)];
        let mut bucket = bucket_for(&entities[..1]);
        bucket.entity_count = 2;
        bucket.total_size_bytes = 200;
        let err = check().check(&bucket, &entities).unwrap_err();
        assert!(matches!(err, FailureReason::InconsistentIndex { detail } if detail.contains("duplicate")));
    }

    #[test]
    fn test_wrong_label_fails() {
        let entities = vec![post(1, 100)];
        let mut bucket = bucket_for(&entities);
        bucket.id = BucketId {
            label: Some(DataLabel::new("r/python").unwrap()),
            ..bucket.id.clone()
        };
        assert!(check().check(&bucket, &entities).is_err());
    }

    #[tokio::test]
    async fn test_zero_count_fails_without_fetch() {
        let transport = MockTransport::new(WIDTH).with_peer("peer-a", vec![post(1, 10)]);
        let mut bucket = bucket_for(&[post(1, 10)]);
        bucket.entity_count = 0;

        let result = check().run(&transport, &PeerId::from("peer-a"), &bucket).await;
        assert!(matches!(result, Err(FailureReason::InconsistentIndex { .. })));
        assert_eq!(transport.bucket_calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_timeout_and_unreachable() {
        let entities = vec![post(1, 10)];
        let bucket = bucket_for(&entities);
        let transport = MockTransport::new(WIDTH).with_peer("peer-a", entities);
        let peer = PeerId::from("peer-a");

        transport.set_bucket_delay(peer.clone(), Duration::from_millis(500));
        assert_eq!(
            check().run(&transport, &peer, &bucket).await,
            Err(FailureReason::Timeout {
                stage: Stage::Tier1
            })
        );

        transport.set_unreachable(peer.clone(), true);
        transport.set_bucket_delay(peer.clone(), Duration::ZERO);
        assert_eq!(
            check().run(&transport, &peer, &bucket).await,
            Err(FailureReason::Unreachable)
        );
    }
}
