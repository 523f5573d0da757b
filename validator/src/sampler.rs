//! Sampler: picks which bucket, and which entities in it, get verified.
//!
//! Bucket choice is weighted by claimed size so verification effort lands
//! where over-claiming pays the most. All randomness is derived from
//! `(peer_id, cycle_id)`, so a sample can be reproduced exactly.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use claims::{Bucket, Entity, PeerId, PeerIndex};

/// Deterministic seed for one peer in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleSeed([u8; 32]);

impl SampleSeed {
    pub fn derive(peer: &PeerId, cycle_id: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(peer.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(cycle_id.to_be_bytes());
        Self(hasher.finalize().into())
    }

    /// Independent stream for entity selection.
    pub fn for_entities(&self) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        hasher.update(b"entities");
        Self(hasher.finalize().into())
    }

    /// RNG seeded from the first 8 bytes of the digest.
    pub fn rng(&self) -> StdRng {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        StdRng::seed_from_u64(u64::from_be_bytes(head))
    }
}

/// Size-weighted bucket and uniform entity sampler.
#[derive(Debug, Clone)]
pub struct Sampler {
    samples_per_peer: usize,
}

impl Sampler {
    pub fn new(samples_per_peer: usize) -> Self {
        Self { samples_per_peer }
    }

    pub fn samples_per_peer(&self) -> usize {
        self.samples_per_peer
    }

    /// Pick a bucket with probability proportional to its claimed size.
    ///
    /// Falls back to a uniform choice when every bucket claims zero bytes.
    /// Returns `None` only for an empty index.
    pub fn select_bucket<'a>(&self, index: &'a PeerIndex, seed: &SampleSeed) -> Option<&'a Bucket> {
        // Order by id so the choice does not depend on how the peer ordered its index.
        let mut buckets: Vec<&Bucket> = index.buckets.iter().collect();
        if buckets.is_empty() {
            return None;
        }
        buckets.sort_by(|a, b| a.id.cmp(&b.id));

        let mut rng = seed.rng();
        let chosen = match WeightedIndex::new(buckets.iter().map(|b| b.total_size_bytes)) {
            Ok(dist) => dist.sample(&mut rng),
            Err(_) => rng.gen_range(0..buckets.len()),
        };
        Some(buckets[chosen])
    }

    /// Pick up to `samples_per_peer` distinct URIs without replacement.
    ///
    /// The result is sorted, so the same inputs always give the same list.
    pub fn select_entities(&self, entities: &[Entity], seed: &SampleSeed) -> Vec<String> {
        let uris: Vec<&str> = entities
            .iter()
            .map(|e| e.uri.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let amount = self.samples_per_peer.min(uris.len());
        let mut rng = seed.for_entities().rng();
        let mut picked: Vec<usize> = rand::seq::index::sample(&mut rng, uris.len(), amount).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| uris[i].to_string()).collect()
    }

    /// Pick the bucket to verify for this peer and cycle.
    pub fn sample(&self, index: &PeerIndex, seed: &SampleSeed) -> Option<Bucket> {
        self.select_bucket(index, seed).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use claims::{BucketId, DataSource, TimeBucket};
    use std::collections::HashMap;

    fn bucket(slot: i64, size: u64) -> Bucket {
        Bucket {
            id: BucketId {
                source: DataSource::X,
                label: None,
                time_bucket: TimeBucket::new(slot),
            },
            entity_count: 1,
            total_size_bytes: size,
        }
    }

    fn index(buckets: Vec<Bucket>) -> PeerIndex {
        PeerIndex::new(PeerId::from("peer-a"), buckets, Utc::now())
    }

    fn entities(count: usize) -> Vec<Entity> {
        (0..count)
            .map(|i| {
                Entity::new(
                    format!("https://x.com/u/status/{}", i),
                    Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap(),
                    DataSource::X,
                    None,
                    vec![b'x'; 10],
                )
            })
            .collect()
    }

    #[test]
    fn test_seed_is_deterministic_per_peer_and_cycle() {
        let a = PeerId::from("peer-a");
        let b = PeerId::from("peer-b");
        assert_eq!(SampleSeed::derive(&a, 1), SampleSeed::derive(&a, 1));
        assert_ne!(SampleSeed::derive(&a, 1), SampleSeed::derive(&a, 2));
        assert_ne!(SampleSeed::derive(&a, 1), SampleSeed::derive(&b, 1));
        assert_ne!(SampleSeed::derive(&a, 1), SampleSeed::derive(&a, 1).for_entities());
    }

    #[test]
    fn test_empty_index_has_no_sample() {
        let sampler = Sampler::new(5);
        let seed = SampleSeed::derive(&PeerId::from("peer-a"), 1);
        assert!(sampler.sample(&index(vec![]), &seed).is_none());
    }

    #[test]
    fn test_zero_sized_buckets_still_sampled() {
        let sampler = Sampler::new(5);
        let seed = SampleSeed::derive(&PeerId::from("peer-a"), 1);
        let idx = index(vec![bucket(0, 0), bucket(1, 0)]);
        assert!(sampler.select_bucket(&idx, &seed).is_some());
    }

    #[test]
    fn test_bucket_choice_is_size_weighted() {
        let sampler = Sampler::new(5);
        let idx = index(vec![bucket(0, 1), bucket(1, 99)]);
        let peer = PeerId::from("peer-a");

        let mut counts: HashMap<i64, usize> = HashMap::new();
        for cycle in 0..1000 {
            let chosen = sampler
                .select_bucket(&idx, &SampleSeed::derive(&peer, cycle))
                .unwrap();
            *counts.entry(chosen.id.time_bucket.id).or_default() += 1;
        }

        assert!(counts.get(&1).copied().unwrap_or(0) > 900);
    }

    #[test]
    fn test_bucket_choice_ignores_index_order() {
        let sampler = Sampler::new(5);
        let seed = SampleSeed::derive(&PeerId::from("peer-a"), 9);
        let forward = index(vec![bucket(0, 10), bucket(1, 20), bucket(2, 30)]);
        let reversed = index(vec![bucket(2, 30), bucket(1, 20), bucket(0, 10)]);

        assert_eq!(
            sampler.select_bucket(&forward, &seed).map(|b| b.id.clone()),
            sampler.select_bucket(&reversed, &seed).map(|b| b.id.clone())
        );
    }

    #[test]
    fn test_entity_selection_without_replacement() {
        let sampler = Sampler::new(5);
        let seed = SampleSeed::derive(&PeerId::from("peer-a"), 3);
        let pool = entities(12);

        let picked = sampler.select_entities(&pool, &seed);
        assert_eq!(picked.len(), 5);
        let distinct: BTreeSet<&String> = picked.iter().collect();
        assert_eq!(distinct.len(), 5);
        assert_eq!(picked, sampler.select_entities(&pool, &seed));

        let small = entities(3);
        assert_eq!(sampler.select_entities(&small, &seed).len(), 3);
    }
}
