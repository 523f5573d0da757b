//! Validator engine: per-peer evaluation and the two-phase cycle.
//!
//! Phase 1 fans out one evaluation per peer (index refresh, sampling,
//! validation, credibility update) with bounded concurrency. Phase 2 runs
//! only after every evaluation has resolved: it computes cross-peer
//! uniqueness, scores, and publishes the share table.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use claims::{PeerId, PeerIndex};
use oracle::{
    AuditError, BulkClaimReport, BulkStorageAuditor, GroundTruthVerifier, LoggingSink,
    PeerTransport, SchemaCatalog, TransportError, WeightSink,
};

use crate::config::ValidatorConfig;
use crate::credibility::CredibilityTracker;
use crate::sampler::{SampleSeed, Sampler};
use crate::scorer::{ScoreTable, Scorer};
use crate::state::ValidatorState;
use crate::store::{PeerIndexStore, PeerLocks};
use crate::types::{FailureReason, PeerCycleResult, Result, Stage, ValidatorError};
use crate::validation::ValidationEngine;

/// Summary of one completed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Unique report id
    pub id: String,
    /// Cycle number
    pub cycle_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Peers evaluated this cycle
    pub evaluated: usize,
    /// Peers whose index refresh failed
    pub unreachable: usize,
    /// Per-peer phase 1 results, sorted by peer
    pub results: Vec<PeerCycleResult>,
    /// Phase 2 scores
    pub scores: ScoreTable,
    /// Whether the weight sink accepted the shares
    pub published: bool,
}

/// Coordinator that evaluates peers and scores them.
pub struct Validator {
    config: ValidatorConfig,
    store: PeerIndexStore,
    locks: PeerLocks,
    credibility: CredibilityTracker,
    storage_credibility: CredibilityTracker,
    sampler: Sampler,
    validation: ValidationEngine,
    scorer: Scorer,
    transport: Arc<dyn PeerTransport>,
    auditor: Option<Arc<dyn BulkStorageAuditor>>,
    sink: Arc<dyn WeightSink>,
    last_cycle_id: AtomicU64,
}

impl Validator {
    /// Create a builder.
    pub fn builder() -> ValidatorBuilder {
        ValidatorBuilder::new()
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn store(&self) -> &PeerIndexStore {
        &self.store
    }

    /// Current primary credibility of a peer.
    pub fn credibility(&self, peer: &PeerId) -> f64 {
        self.credibility.get(peer)
    }

    /// Current storage-audit credibility of a peer.
    pub fn storage_credibility(&self, peer: &PeerId) -> f64 {
        self.storage_credibility.get(peer)
    }

    pub fn last_cycle_id(&self) -> u64 {
        self.last_cycle_id.load(Ordering::SeqCst)
    }

    /// Start evaluating a peer in future cycles.
    pub fn register_peer(&self, peer: PeerId) {
        if self.store.register(peer.clone()) {
            info!(peer_id = %peer, "Peer registered");
        }
    }

    /// Stop evaluating a peer and drop its index and credibility.
    pub fn deregister_peer(&self, peer: &PeerId) -> Result<()> {
        if self.store.remove(peer).is_none() {
            return Err(ValidatorError::UnknownPeer(peer.clone()));
        }
        self.credibility.remove(peer);
        self.storage_credibility.remove(peer);
        self.locks.remove(peer);
        info!(peer_id = %peer, "Peer deregistered");
        Ok(())
    }

    /// Administrative credibility reset.
    pub fn reset_credibility(&self, peer: &PeerId) -> Result<()> {
        if !self.store.contains(peer) {
            return Err(ValidatorError::UnknownPeer(peer.clone()));
        }
        self.credibility.reset(peer);
        self.storage_credibility.reset(peer);
        warn!(peer_id = %peer, "Credibility reset");
        Ok(())
    }

    /// All registered peers.
    pub fn registered_peers(&self) -> Vec<PeerId> {
        self.store.peers()
    }

    /// Registered peers whose minimum interval has elapsed.
    pub fn due_peers(&self, now: DateTime<Utc>) -> Vec<PeerId> {
        let interval = chrono::Duration::seconds(
            i64::try_from(self.config.scheduler.min_interval_secs).unwrap_or(i64::MAX),
        );
        self.store.due_peers(now, interval)
    }

    /// Evaluate one peer: refresh, sample, validate, update credibility.
    ///
    /// Never fails; every problem becomes part of the result.
    pub async fn evaluate_peer(&self, peer: &PeerId, cycle_id: u64) -> PeerCycleResult {
        let _guard = self.locks.lock(peer).await;
        let now = Utc::now();

        let index = match self.refresh_index(peer).await {
            Ok(index) => self.store.record_refresh(index, now),
            Err(e) => {
                let failures = self.store.mark_unreachable(peer, e.to_string());
                let credibility = self.credibility.update(peer, 0.0);
                warn!(
                    peer_id = %peer,
                    cycle_id,
                    error = %e,
                    consecutive_failures = failures,
                    credibility,
                    "Peer unreachable"
                );
                self.store.mark_evaluated(peer, now);
                let mut result = PeerCycleResult::empty(peer.clone(), false, credibility);
                result.index_failure = Some(match e {
                    TransportError::Timeout => FailureReason::Timeout {
                        stage: Stage::Index,
                    },
                    _ => FailureReason::Unreachable,
                });
                result.outcome = Some(0.0);
                result.storage_credibility = self.storage_credibility.get(peer);
                return result;
            }
        };

        let seed = SampleSeed::derive(peer, cycle_id);
        let Some(bucket) = self.sampler.sample(&index, &seed) else {
            debug!(peer_id = %peer, cycle_id, "Peer claims no data");
            self.store.mark_evaluated(peer, now);
            let mut result = PeerCycleResult::empty(peer.clone(), true, self.credibility.get(peer));
            result.storage_credibility = self.storage_credibility.get(peer);
            return result;
        };

        let validation = self.validation.validate_bucket(peer, &bucket, &seed, now).await;
        let outcome = validation.outcome_fraction(self.config.validation.outcome_basis);
        let credibility = self.credibility.update(peer, outcome);

        let (storage_report, storage_credibility) = self.audit_storage(peer).await;
        self.store.mark_evaluated(peer, now);

        info!(
            peer_id = %peer,
            cycle_id,
            sampled = validation.outcomes.len(),
            passed = validation.passed(),
            outcome,
            credibility,
            "Peer evaluated"
        );

        PeerCycleResult {
            peer_id: peer.clone(),
            responsive: true,
            index_failure: None,
            sampled_bucket: Some(bucket.id),
            outcomes: validation.outcomes,
            tier1_failure: validation.tier1_failure,
            claimed_keys: validation.claimed_keys,
            validated: validation.validated,
            outcome: Some(outcome),
            credibility,
            storage_credibility,
            storage_report,
        }
    }

    /// Run one full cycle over `peers`.
    ///
    /// Only a scoring failure fails the cycle. Phase 1 side effects stay:
    /// credibility has already moved and the peers count as evaluated.
    pub async fn run_cycle(&self, peers: &[PeerId], cycle_id: u64) -> Result<CycleReport> {
        let started_at = Utc::now();
        info!(cycle_id, peers = peers.len(), "Cycle started");

        for peer in peers {
            self.store.register(peer.clone());
        }

        // Phase 1: per-peer evaluation, no ordering between peers.
        let this = self;
        let mut results: Vec<PeerCycleResult> = stream::iter(peers.iter().cloned())
            .map(move |peer| async move { this.evaluate_peer(&peer, cycle_id).await })
            .buffer_unordered(self.config.scheduler.max_concurrent_peers.max(1))
            .collect()
            .await;
        results.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

        // Phase 2: every peer has reported, uniqueness is now well-defined.
        let scores = self.score_results(cycle_id, &results)?;

        let shares = scores.shares();
        let published = match self.sink.publish(&shares).await {
            Ok(()) => true,
            Err(e) => {
                error!(cycle_id, error = %e, "Failed to publish incentive shares");
                false
            }
        };

        self.last_cycle_id.store(cycle_id, Ordering::SeqCst);

        let unreachable = results.iter().filter(|r| !r.responsive).count();
        let finished_at = Utc::now();
        info!(
            cycle_id,
            evaluated = results.len(),
            unreachable,
            published,
            duration_ms = (finished_at - started_at).num_milliseconds(),
            "Cycle finished"
        );

        Ok(CycleReport {
            id: uuid::Uuid::new_v4().to_string(),
            cycle_id,
            started_at,
            finished_at,
            evaluated: results.len(),
            unreachable,
            results,
            scores,
            published,
        })
    }

    /// Score phase 1 results.
    ///
    /// Scoring is pure, so a failure is not retried: the same results would
    /// fail the same way.
    pub fn score_results(&self, cycle_id: u64, results: &[PeerCycleResult]) -> Result<ScoreTable> {
        self.scorer.score(cycle_id, results, Utc::now()).map_err(|e| {
            error!(cycle_id, error = %e, "Scoring failed, cycle abandoned");
            ValidatorError::from(e)
        })
    }

    /// Snapshot of the trust history.
    pub fn state(&self) -> ValidatorState {
        ValidatorState {
            credibility: self.credibility.snapshot(),
            storage_credibility: self.storage_credibility.snapshot(),
            last_cycle_id: self.last_cycle_id(),
            saved_at: Utc::now(),
        }
    }

    /// Restore trust history; restored peers are registered.
    pub fn restore(&self, state: &ValidatorState) {
        self.credibility.restore(&state.credibility);
        self.storage_credibility.restore(&state.storage_credibility);
        for peer in state.credibility.keys() {
            self.store.register(peer.clone());
        }
        self.last_cycle_id.store(state.last_cycle_id, Ordering::SeqCst);
    }

    pub async fn save_state(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.state().save(path).await?;
        info!(path = %path.display(), "Validator state saved");
        Ok(())
    }

    pub async fn load_state(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let state = ValidatorState::load(path).await?;
        self.restore(&state);
        info!(
            path = %path.display(),
            peers = state.credibility.len(),
            last_cycle_id = state.last_cycle_id,
            "Validator state loaded"
        );
        Ok(())
    }

    async fn refresh_index(&self, peer: &PeerId) -> std::result::Result<PeerIndex, TransportError> {
        let transport = self.transport.as_ref();
        let timeout = self.config.validation.index_timeout();

        let index = self
            .config
            .validation
            .retry_policy()
            .run(
                || async move {
                    match tokio::time::timeout(timeout, transport.get_index(peer)).await {
                        Ok(result) => result,
                        Err(_) => Err(TransportError::Timeout),
                    }
                },
                TransportError::is_transient,
            )
            .await?;

        if &index.peer_id != peer {
            return Err(TransportError::Protocol(format!(
                "index reported for {} instead",
                index.peer_id
            )));
        }
        Ok(index)
    }

    /// Run the bulk audit and feed the storage credibility track.
    async fn audit_storage(&self, peer: &PeerId) -> (Option<BulkClaimReport>, f64) {
        let Some(auditor) = &self.auditor else {
            return (None, self.storage_credibility.get(peer));
        };

        let timeout = self.config.validation.audit_timeout();
        let report = match tokio::time::timeout(timeout, auditor.verify_bulk_claim(peer)).await {
            Ok(result) => result,
            Err(_) => Err(AuditError::Timeout),
        };

        match report {
            Ok(report) if report.bytes_confirmed > 0 => {
                let credibility = self.storage_credibility.update(peer, report.quality());
                (Some(report), credibility)
            }
            Ok(_) => (None, self.storage_credibility.update(peer, 0.0)),
            Err(e) => {
                debug!(peer_id = %peer, error = %e, "Bulk audit yielded nothing");
                (None, self.storage_credibility.update(peer, 0.0))
            }
        }
    }
}

/// Builder for [`Validator`].
pub struct ValidatorBuilder {
    config: ValidatorConfig,
    transport: Option<Arc<dyn PeerTransport>>,
    ground_truth: Option<Arc<dyn GroundTruthVerifier>>,
    auditor: Option<Arc<dyn BulkStorageAuditor>>,
    sink: Option<Arc<dyn WeightSink>>,
    schemas: SchemaCatalog,
}

impl ValidatorBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: ValidatorConfig::default(),
            transport: None,
            ground_truth: None,
            auditor: None,
            sink: None,
            schemas: SchemaCatalog::default(),
        }
    }

    pub fn config(mut self, config: ValidatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn PeerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn ground_truth(mut self, ground_truth: Arc<dyn GroundTruthVerifier>) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    /// Enable the bulk-storage audit path.
    pub fn auditor(mut self, auditor: Arc<dyn BulkStorageAuditor>) -> Self {
        self.auditor = Some(auditor);
        self
    }

    /// Where shares go; defaults to [`LoggingSink`].
    pub fn sink(mut self, sink: Arc<dyn WeightSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn schemas(mut self, schemas: SchemaCatalog) -> Self {
        self.schemas = schemas;
        self
    }

    /// Build the validator. Fails on invalid config or missing collaborators.
    pub fn build(self) -> Result<Validator> {
        self.config.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| ValidatorError::Config("peer transport is required".to_string()))?;
        let ground_truth = self
            .ground_truth
            .ok_or_else(|| ValidatorError::Config("ground truth verifier is required".to_string()))?;

        let config = self.config;
        let validation = ValidationEngine::new(
            &config.validation,
            &config.sampling,
            Arc::clone(&transport),
            ground_truth,
            Arc::new(self.schemas),
        )
        .with_equivalence(config.scoring.equivalence);

        Ok(Validator {
            store: PeerIndexStore::new(config.sampling.max_buckets_per_index),
            locks: PeerLocks::new(),
            credibility: CredibilityTracker::new(config.credibility.alpha, config.credibility.initial),
            storage_credibility: CredibilityTracker::new(
                config.credibility.storage_alpha,
                config.credibility.initial,
            ),
            sampler: Sampler::new(config.sampling.samples_per_peer),
            validation,
            scorer: Scorer::new(&config),
            transport,
            auditor: self.auditor,
            sink: self.sink.unwrap_or_else(|| Arc::new(LoggingSink)),
            last_cycle_id: AtomicU64::new(0),
            config,
        })
    }
}

impl Default for ValidatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{DataLabel, DataSource, Entity};
    use oracle::mock::{MockGroundTruth, MockTransport, RecordingSink};
    use serde_json::json;

    fn posts(prefix: &str, count: usize) -> Vec<Entity> {
        let at = Utc::now() - chrono::Duration::hours(2);
        (0..count)
            .map(|i| {
                let content = json!({
                    "id": format!("{}{}", prefix, i), "community": "r/rust",
                    "username": prefix, "body": "text", "data_type": "post"
                });
                Entity::new(
                    format!("https://reddit.com/r/rust/comments/{}{}", prefix, i),
                    at,
                    DataSource::Reddit,
                    Some(DataLabel::new("r/rust").unwrap()),
                    serde_json::to_vec(&content).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_build_requires_collaborators() {
        assert!(matches!(
            Validator::builder().build(),
            Err(ValidatorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_evaluate_and_cycle() {
        let entities = posts("a", 6);
        let transport = Arc::new(MockTransport::new(3600).with_peer("peer-a", entities.clone()));
        let truth = Arc::new(MockGroundTruth::default().with_entities(&entities));
        let sink = Arc::new(RecordingSink::new());

        let validator = Validator::builder()
            .config(ValidatorConfig::test_mode().with_credibility(0.5, 1.0, 0.0))
            .transport(transport)
            .ground_truth(truth)
            .sink(sink.clone())
            .build()
            .unwrap();

        let peer = PeerId::from("peer-a");
        let report = validator.run_cycle(&[peer.clone()], 1).await.unwrap();

        assert_eq!(report.evaluated, 1);
        assert_eq!(report.unreachable, 0);
        assert!(report.published);
        assert_eq!(validator.credibility(&peer), 0.5);
        assert_eq!(sink.last().unwrap().get(&peer), 1.0);
        assert_eq!(validator.last_cycle_id(), 1);
    }

    #[tokio::test]
    async fn test_admin_operations() {
        let transport = Arc::new(MockTransport::new(3600).with_peer("peer-a", posts("a", 1)));
        let validator = Validator::builder()
            .config(ValidatorConfig::test_mode())
            .transport(transport)
            .ground_truth(Arc::new(MockGroundTruth::default()))
            .build()
            .unwrap();

        let peer = PeerId::from("peer-a");
        validator.register_peer(peer.clone());
        assert_eq!(validator.registered_peers(), vec![peer.clone()]);

        validator.reset_credibility(&peer).unwrap();
        validator.deregister_peer(&peer).unwrap();
        assert!(validator.registered_peers().is_empty());
        assert!(matches!(
            validator.deregister_peer(&peer),
            Err(ValidatorError::UnknownPeer(_))
        ));
    }

    #[tokio::test]
    async fn test_scoring_failure_is_not_retried() {
        let entities = posts("a", 2);
        let validator = Validator::builder()
            .config(ValidatorConfig::test_mode())
            .transport(Arc::new(MockTransport::new(3600)))
            .ground_truth(Arc::new(MockGroundTruth::default()))
            .build()
            .unwrap();

        let broken = PeerCycleResult {
            validated: entities,
            ..PeerCycleResult::empty(PeerId::from("peer-a"), true, f64::NAN)
        };
        assert!(matches!(
            validator.score_results(7, &[broken]),
            Err(ValidatorError::Scoring(_))
        ));
    }
}
