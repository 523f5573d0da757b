//! In-memory collaborators for testing and local fixtures.
//!
//! Every mock is shareable behind an `Arc` and reconfigurable through `&self`
//! so tests can change peer behavior between cycles.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use claims::{BucketId, Entity, NaturalKey, PeerId, PeerIndex};

use crate::audit::{AuditError, BulkClaimReport, BulkStorageAuditor};
use crate::compare::parse_content;
use crate::ground_truth::{CanonicalRecord, GroundTruthVerifier, Lookup, LookupError};
use crate::transport::{PeerTransport, TransportError};
use crate::weights::{IncentiveShares, SinkError, WeightSink};

/// Behavior of one simulated peer.
#[derive(Debug, Clone, Default)]
struct MockPeer {
    entities: Vec<Entity>,
    index_override: Option<PeerIndex>,
    bucket_overrides: HashMap<BucketId, Vec<Entity>>,
    unreachable: bool,
    index_delay: Option<Duration>,
    bucket_delay: Option<Duration>,
    failures_before_success: u32,
}

/// Mock peer transport.
///
/// Indexes are derived from each peer's entity list unless overridden.
pub struct MockTransport {
    width_secs: u64,
    peers: RwLock<HashMap<PeerId, MockPeer>>,
    index_calls: AtomicU32,
    bucket_calls: AtomicU32,
}

impl MockTransport {
    /// Create a transport that buckets entities with the given width.
    pub fn new(width_secs: u64) -> Self {
        Self {
            width_secs,
            peers: RwLock::new(HashMap::new()),
            index_calls: AtomicU32::new(0),
            bucket_calls: AtomicU32::new(0),
        }
    }

    /// Add a peer holding the given entities.
    pub fn with_peer(self, peer: impl Into<PeerId>, entities: Vec<Entity>) -> Self {
        self.set_entities(peer, entities);
        self
    }

    /// Replace a peer's entities, registering the peer if needed.
    pub fn set_entities(&self, peer: impl Into<PeerId>, entities: Vec<Entity>) {
        self.update(peer.into(), |p| p.entities = entities);
    }

    /// Make a peer refuse every request.
    pub fn set_unreachable(&self, peer: impl Into<PeerId>, unreachable: bool) {
        self.update(peer.into(), |p| p.unreachable = unreachable);
    }

    /// Delay index responses.
    pub fn set_index_delay(&self, peer: impl Into<PeerId>, delay: Duration) {
        self.update(peer.into(), |p| p.index_delay = Some(delay));
    }

    /// Delay bucket responses.
    pub fn set_bucket_delay(&self, peer: impl Into<PeerId>, delay: Duration) {
        self.update(peer.into(), |p| p.bucket_delay = Some(delay));
    }

    /// Fail the next `count` index requests with a transient error.
    pub fn fail_next(&self, peer: impl Into<PeerId>, count: u32) {
        self.update(peer.into(), |p| p.failures_before_success = count);
    }

    /// Report this index instead of one derived from entities.
    pub fn override_index(&self, peer: impl Into<PeerId>, index: PeerIndex) {
        self.update(peer.into(), |p| p.index_override = Some(index));
    }

    /// Answer requests for `bucket` with these entities.
    pub fn override_bucket(&self, peer: impl Into<PeerId>, bucket: BucketId, entities: Vec<Entity>) {
        self.update(peer.into(), |p| {
            p.bucket_overrides.insert(bucket, entities);
        });
    }

    /// Forget a peer entirely.
    pub fn remove_peer(&self, peer: &PeerId) {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer);
    }

    /// Number of index requests served (including failures).
    pub fn index_calls(&self) -> u32 {
        self.index_calls.load(Ordering::SeqCst)
    }

    /// Number of bucket requests served (including failures).
    pub fn bucket_calls(&self) -> u32 {
        self.bucket_calls.load(Ordering::SeqCst)
    }

    fn update(&self, peer: PeerId, f: impl FnOnce(&mut MockPeer)) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        f(peers.entry(peer).or_default());
    }

    fn snapshot(&self, peer: &PeerId) -> Option<MockPeer> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .cloned()
    }

    /// Consume one scripted failure, returning whether one was pending.
    fn take_failure(&self, peer: &PeerId) -> bool {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        match peers.get_mut(peer) {
            Some(p) if p.failures_before_success > 0 => {
                p.failures_before_success -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn get_index(&self, peer: &PeerId) -> Result<PeerIndex, TransportError> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);

        let state = self
            .snapshot(peer)
            .ok_or_else(|| TransportError::Unreachable(format!("unknown peer {}", peer)))?;

        if let Some(delay) = state.index_delay {
            tokio::time::sleep(delay).await;
        }
        if state.unreachable {
            return Err(TransportError::Unreachable(format!("{} is offline", peer)));
        }
        if self.take_failure(peer) {
            return Err(TransportError::Unreachable(format!(
                "{} dropped the connection",
                peer
            )));
        }

        Ok(match state.index_override {
            Some(index) => index,
            None => PeerIndex::from_entities(peer.clone(), &state.entities, self.width_secs, Utc::now()),
        })
    }

    async fn get_bucket_entities(
        &self,
        peer: &PeerId,
        bucket: &BucketId,
    ) -> Result<Vec<Entity>, TransportError> {
        self.bucket_calls.fetch_add(1, Ordering::SeqCst);

        let state = self
            .snapshot(peer)
            .ok_or_else(|| TransportError::Unreachable(format!("unknown peer {}", peer)))?;

        if let Some(delay) = state.bucket_delay {
            tokio::time::sleep(delay).await;
        }
        if state.unreachable {
            return Err(TransportError::Unreachable(format!("{} is offline", peer)));
        }

        if let Some(entities) = state.bucket_overrides.get(bucket) {
            return Ok(entities.clone());
        }
        Ok(state
            .entities
            .into_iter()
            .filter(|e| &e.bucket_id(self.width_secs) == bucket)
            .collect())
    }
}

/// Mock ground-truth verifier backed by a map of records.
pub struct MockGroundTruth {
    id: String,
    records: RwLock<HashMap<NaturalKey, Map<String, Value>>>,
    available: AtomicBool,
    pending_failures: AtomicU32,
    delay: Option<Duration>,
    call_count: AtomicU32,
}

impl MockGroundTruth {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            records: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            pending_failures: AtomicU32::new(0),
            delay: None,
            call_count: AtomicU32::new(0),
        }
    }

    /// Seed ground truth with the claimed content of these entities, so they
    /// all verify cleanly. Entities whose content is not a JSON object are
    /// skipped.
    pub fn with_entities(self, entities: &[Entity]) -> Self {
        self.mirror(entities);
        self
    }

    /// Delay every lookup.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// See [`MockGroundTruth::with_entities`].
    pub fn mirror(&self, entities: &[Entity]) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        for entity in entities {
            if let Ok(fields) = parse_content(entity) {
                records.insert(entity.natural_key(), fields);
            }
        }
    }

    /// Set the authoritative fields for a key.
    pub fn insert(&self, key: NaturalKey, fields: Map<String, Value>) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, fields);
    }

    /// Drop a record so lookups return `NotFound`.
    pub fn remove(&self, key: &NaturalKey) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Toggle availability; unavailable lookups fail transiently.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `count` lookups with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for MockGroundTruth {
    fn default() -> Self {
        Self::new("mock-ground-truth")
    }
}

#[async_trait]
impl GroundTruthVerifier for MockGroundTruth {
    fn id(&self) -> &str {
        &self.id
    }

    async fn lookup(&self, key: &NaturalKey) -> Result<Lookup, LookupError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(LookupError::Unavailable("Mock ground truth disabled".to_string()));
        }
        let failed = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(LookupError::Unavailable("Mock ground truth flaked".to_string()));
        }

        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(match records.get(key) {
            Some(fields) => Lookup::Found(CanonicalRecord::new(key.clone(), fields.clone())),
            None => Lookup::NotFound,
        })
    }
}

/// Mock bulk-storage auditor with fixed per-peer reports.
#[derive(Default)]
pub struct MockAuditor {
    reports: RwLock<HashMap<PeerId, BulkClaimReport>>,
    call_count: AtomicU32,
}

impl MockAuditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_report(self, peer: impl Into<PeerId>, report: BulkClaimReport) -> Self {
        self.set_report(peer, report);
        self
    }

    pub fn set_report(&self, peer: impl Into<PeerId>, report: BulkClaimReport) {
        self.reports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer.into(), report);
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BulkStorageAuditor for MockAuditor {
    async fn verify_bulk_claim(&self, peer: &PeerId) -> Result<BulkClaimReport, AuditError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.reports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .copied()
            .ok_or(AuditError::NoBulkClaim)
    }
}

/// Sink that keeps every published table.
#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<IncentiveShares>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All tables published so far, oldest first.
    pub fn published(&self) -> Vec<IncentiveShares> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<IncentiveShares> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

#[async_trait]
impl WeightSink for RecordingSink {
    async fn publish(&self, shares: &IncentiveShares) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("Recording sink set to fail".to_string()));
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(shares.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{DataLabel, DataSource};
    use serde_json::json;

    fn post(id: &str) -> Entity {
        Entity::new(
            format!("https://reddit.com/r/rust/comments/{}", id),
            Utc::now(),
            DataSource::Reddit,
            Some(DataLabel::new("r/rust").unwrap()),
            serde_json::to_vec(&json!({ "id": id, "body": "hello" })).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_transport_derives_index_and_buckets() {
        let entities = vec![post("a"), post("b")];
        let transport = MockTransport::new(3600).with_peer("peer-a", entities.clone());
        let peer = PeerId::from("peer-a");

        let index = transport.get_index(&peer).await.unwrap();
        assert_eq!(index.buckets.len(), 1);
        assert_eq!(index.buckets[0].entity_count, 2);

        let fetched = transport
            .get_bucket_entities(&peer, &index.buckets[0].id)
            .await
            .unwrap();
        assert_eq!(fetched, entities);
        assert_eq!(transport.index_calls(), 1);
        assert_eq!(transport.bucket_calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_scripted_failures() {
        let transport = MockTransport::new(3600).with_peer("peer-a", vec![post("a")]);
        let peer = PeerId::from("peer-a");

        transport.fail_next(peer.clone(), 2);
        assert!(transport.get_index(&peer).await.unwrap_err().is_transient());
        assert!(transport.get_index(&peer).await.is_err());
        assert!(transport.get_index(&peer).await.is_ok());

        transport.set_unreachable(peer.clone(), true);
        assert!(transport.get_index(&peer).await.is_err());
        assert!(transport.get_index(&PeerId::from("nobody")).await.is_err());
    }

    #[tokio::test]
    async fn test_ground_truth_found_and_not_found() {
        let entity = post("a");
        let truth = MockGroundTruth::default().with_entities(std::slice::from_ref(&entity));

        match truth.lookup(&entity.natural_key()).await.unwrap() {
            Lookup::Found(record) => assert_eq!(record.fields["id"], json!("a")),
            Lookup::NotFound => panic!("record should exist"),
        }
        assert_eq!(
            truth.lookup(&post("zzz").natural_key()).await.unwrap(),
            Lookup::NotFound
        );

        truth.fail_next(1);
        assert!(truth.lookup(&entity.natural_key()).await.is_err());
        assert!(truth.lookup(&entity.natural_key()).await.is_ok());
        assert_eq!(truth.call_count(), 4);
    }

    #[tokio::test]
    async fn test_auditor_and_sink() {
        let auditor = MockAuditor::new().with_report(
            "peer-a",
            BulkClaimReport {
                bytes_confirmed: 10,
                duplicate_rate: 0.0,
            },
        );
        assert!(auditor.verify_bulk_claim(&PeerId::from("peer-a")).await.is_ok());
        assert_eq!(
            auditor.verify_bulk_claim(&PeerId::from("peer-b")).await,
            Err(AuditError::NoBulkClaim)
        );

        let sink = RecordingSink::new();
        sink.publish(&IncentiveShares::default()).await.unwrap();
        sink.set_failing(true);
        assert!(sink.publish(&IncentiveShares::default()).await.is_err());
        assert_eq!(sink.published().len(), 1);
    }
}
