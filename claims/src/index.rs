//! Peer identity and the per-peer bucket index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::bucket::{Bucket, BucketId};
use crate::entity::Entity;

/// Identity of a data-producing peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Snapshot of everything a peer claims to hold, summarized per bucket.
///
/// Replaced wholesale whenever the peer answers an index request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIndex {
    /// Reporting peer
    pub peer_id: PeerId,
    /// Claimed buckets
    pub buckets: Vec<Bucket>,
    /// When the peer produced this index
    pub last_updated: DateTime<Utc>,
    /// Sum of all bucket sizes
    pub total_claimed_bytes: u64,
}

impl PeerIndex {
    /// Create an index, computing the claimed total from its buckets.
    pub fn new(peer_id: PeerId, buckets: Vec<Bucket>, last_updated: DateTime<Utc>) -> Self {
        let total_claimed_bytes = total_size(&buckets);
        Self {
            peer_id,
            buckets,
            last_updated,
            total_claimed_bytes,
        }
    }

    /// Summarize a list of entities into buckets of the given width.
    pub fn from_entities(
        peer_id: PeerId,
        entities: &[Entity],
        width_secs: u64,
        last_updated: DateTime<Utc>,
    ) -> Self {
        let mut summary: BTreeMap<BucketId, (u64, u64)> = BTreeMap::new();
        for entity in entities {
            let slot = summary.entry(entity.bucket_id(width_secs)).or_default();
            slot.0 += 1;
            slot.1 = slot.1.saturating_add(entity.content_size_bytes);
        }

        let buckets = summary
            .into_iter()
            .map(|(id, (entity_count, total_size_bytes))| Bucket {
                id,
                entity_count,
                total_size_bytes,
            })
            .collect();

        Self::new(peer_id, buckets, last_updated)
    }

    pub fn bucket(&self, id: &BucketId) -> Option<&Bucket> {
        self.buckets.iter().find(|b| &b.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Keep only the `max_buckets` largest buckets. Returns how many were dropped.
    pub fn truncate_to_largest(&mut self, max_buckets: usize) -> usize {
        if self.buckets.len() <= max_buckets {
            return 0;
        }
        let dropped = self.buckets.len() - max_buckets;
        self.buckets.sort_by(|a, b| {
            b.total_size_bytes
                .cmp(&a.total_size_bytes)
                .then_with(|| a.id.cmp(&b.id))
        });
        self.buckets.truncate(max_buckets);
        self.total_claimed_bytes = total_size(&self.buckets);
        dropped
    }
}

fn total_size(buckets: &[Bucket]) -> u64 {
    buckets
        .iter()
        .fold(0u64, |acc, b| acc.saturating_add(b.total_size_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{DataLabel, DataSource};
    use chrono::TimeZone;

    fn post(uri: &str, hour: u32, size: usize) -> Entity {
        Entity::new(
            uri,
            Utc.with_ymd_and_hms(2026, 10, 16, hour, 5, 0).unwrap(),
            DataSource::Reddit,
            Some(DataLabel::new("r/rust").unwrap()),
            vec![b'a'; size],
        )
    }

    #[test]
    fn test_from_entities_groups_by_bucket() {
        let entities = vec![post("u1", 10, 100), post("u2", 10, 50), post("u3", 11, 25)];
        let index = PeerIndex::from_entities(PeerId::from("peer-a"), &entities, 3600, Utc::now());

        assert_eq!(index.buckets.len(), 2);
        assert_eq!(index.total_claimed_bytes, 175);

        let first = &index.buckets[0];
        assert_eq!(first.entity_count, 2);
        assert_eq!(first.total_size_bytes, 150);
        assert!(index.bucket(&first.id).is_some());
    }

    #[test]
    fn test_truncate_keeps_largest() {
        let entities = vec![post("u1", 1, 10), post("u2", 2, 30), post("u3", 3, 20)];
        let mut index = PeerIndex::from_entities(PeerId::from("peer-a"), &entities, 3600, Utc::now());

        assert_eq!(index.truncate_to_largest(2), 1);
        assert_eq!(index.buckets.len(), 2);
        assert_eq!(index.total_claimed_bytes, 50);
        assert_eq!(index.truncate_to_largest(5), 0);
    }
}
