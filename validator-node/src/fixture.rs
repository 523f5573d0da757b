//! Simulated worlds: peers, their claimed data, and the ground truth behind it.
//!
//! A world file describes everything the validator talks to, so a full
//! node can run without any real network or upstream source:
//!
//! ```yaml
//! peers:
//!   - id: peer-a
//!     entities:
//!       - uri: https://reddit.com/r/rust/comments/abc
//!         source: reddit
//!         label: r/rust
//!         age_hours: 3
//!         content: { id: abc, community: r/rust, username: ferris, body: hi, data_type: post }
//!   - id: peer-b
//!     unreachable: true
//! ground_truth:
//!   missing: [https://reddit.com/r/rust/comments/abc]
//! audits:
//!   peer-a: { bytes_confirmed: 4096, duplicate_rate: 0.1 }
//! ```
//!
//! Ground truth mirrors every entity a peer claims unless a record is
//! overridden or listed as missing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use claims::{normalize_uri, DataLabel, DataSource, Entity, NaturalKey, PeerId};
use oracle::mock::{MockAuditor, MockGroundTruth, MockTransport};
use oracle::{BulkClaimReport, WeightSink};
use validator::{Validator, ValidatorConfig};

/// Error types for world files.
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid world file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid entity {uri}: {reason}")]
    InvalidEntity { uri: String, reason: String },

    #[error("Duplicate peer {0}")]
    DuplicatePeer(PeerId),
}

pub type Result<T> = std::result::Result<T, FixtureError>;

/// One claimed entity as written in a world file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    pub uri: String,
    pub source: DataSource,
    #[serde(default)]
    pub label: Option<String>,
    /// Absolute observation time; wins over `age_hours`
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Observation time relative to when the world is loaded
    #[serde(default = "default_age_hours")]
    pub age_hours: i64,
    /// JSON payload, serialized to bytes as the entity content
    #[serde(default)]
    pub content: Value,
    /// Claimed size when it should not match the content
    #[serde(default)]
    pub claimed_size_bytes: Option<u64>,
}

fn default_age_hours() -> i64 {
    1
}

impl EntitySpec {
    /// Materialize the entity relative to `now`.
    pub fn to_entity(&self, now: DateTime<Utc>) -> Result<Entity> {
        let label = self
            .label
            .as_deref()
            .map(DataLabel::new)
            .transpose()
            .map_err(|e| self.invalid(e.to_string()))?;
        let content = serde_json::to_vec(&self.content).map_err(|e| self.invalid(e.to_string()))?;
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| now - Duration::hours(self.age_hours));

        let mut entity = Entity::new(self.uri.clone(), timestamp, self.source, label, content);
        if let Some(size) = self.claimed_size_bytes {
            entity.content_size_bytes = size;
        }
        Ok(entity)
    }

    fn invalid(&self, reason: String) -> FixtureError {
        FixtureError::InvalidEntity {
            uri: self.uri.clone(),
            reason,
        }
    }
}

/// One simulated peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSpec {
    pub id: PeerId,
    #[serde(default)]
    pub unreachable: bool,
    /// Transient index failures before the first success
    #[serde(default)]
    pub flaky_requests: u32,
    #[serde(default)]
    pub entities: Vec<EntitySpec>,
}

/// Authoritative record replacing the mirrored one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSpec {
    pub uri: String,
    pub source: DataSource,
    pub fields: Map<String, Value>,
}

impl RecordSpec {
    pub fn key(&self) -> NaturalKey {
        NaturalKey {
            source: self.source,
            canonical_id: normalize_uri(&self.uri),
        }
    }
}

/// Ground truth adjustments on top of the mirrored claims.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundTruthSpec {
    /// Records whose fields differ from what peers claim
    pub records: Vec<RecordSpec>,
    /// URIs the source does not know about
    pub missing: Vec<String>,
    /// Take the whole source offline
    pub unavailable: bool,
}

/// A complete simulated environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct World {
    pub peers: Vec<PeerSpec>,
    pub ground_truth: GroundTruthSpec,
    /// Bulk audit results; no entry means the peer has no bulk claim
    pub audits: BTreeMap<PeerId, BulkClaimReport>,
}

/// Mock collaborators built from a [`World`].
pub struct Collaborators {
    pub transport: Arc<MockTransport>,
    pub ground_truth: Arc<MockGroundTruth>,
    pub auditor: Option<Arc<MockAuditor>>,
    pub peers: Vec<PeerId>,
}

impl Collaborators {
    /// Build a validator wired to these collaborators, with every world
    /// peer registered. Shares are only logged unless a sink is given.
    pub fn validator(
        &self,
        config: ValidatorConfig,
        sink: Option<Arc<dyn WeightSink>>,
    ) -> validator::Result<Validator> {
        let mut builder = Validator::builder()
            .config(config)
            .transport(self.transport.clone())
            .ground_truth(self.ground_truth.clone());
        if let Some(auditor) = &self.auditor {
            builder = builder.auditor(auditor.clone());
        }
        if let Some(sink) = sink {
            builder = builder.sink(sink);
        }
        let validator = builder.build()?;
        for peer in &self.peers {
            validator.register_peer(peer.clone());
        }
        Ok(validator)
    }
}

impl World {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let world: Self = serde_yaml::from_str(yaml)?;
        world.check_peers()?;
        Ok(world)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&yaml)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.iter().map(|p| p.id.clone()).collect()
    }

    /// Claimed entities per peer, timestamped relative to `now`.
    pub fn entities(&self, now: DateTime<Utc>) -> Result<BTreeMap<PeerId, Vec<Entity>>> {
        self.peers
            .iter()
            .map(|peer| {
                let entities = peer
                    .entities
                    .iter()
                    .map(|spec| spec.to_entity(now))
                    .collect::<Result<Vec<_>>>()?;
                Ok((peer.id.clone(), entities))
            })
            .collect()
    }

    /// Build mock collaborators for this world.
    pub fn build(&self, time_bucket_width_secs: u64) -> Result<Collaborators> {
        let entities = self.entities(Utc::now())?;

        let transport = MockTransport::new(time_bucket_width_secs);
        let ground_truth = MockGroundTruth::new("world");

        for peer in &self.peers {
            let claimed = entities.get(&peer.id).cloned().unwrap_or_default();
            ground_truth.mirror(&claimed);
            transport.set_entities(peer.id.clone(), claimed);
            if peer.unreachable {
                transport.set_unreachable(peer.id.clone(), true);
            }
            if peer.flaky_requests > 0 {
                transport.fail_next(peer.id.clone(), peer.flaky_requests);
            }
        }

        for record in &self.ground_truth.records {
            ground_truth.insert(record.key(), record.fields.clone());
        }
        for peer_entities in entities.values() {
            for entity in peer_entities {
                if self.ground_truth.missing.contains(&entity.uri) {
                    ground_truth.remove(&entity.natural_key());
                }
            }
        }
        ground_truth.set_available(!self.ground_truth.unavailable);

        let auditor = if self.audits.is_empty() {
            None
        } else {
            let auditor = MockAuditor::new();
            for (peer, report) in &self.audits {
                auditor.set_report(peer.clone(), *report);
            }
            Some(Arc::new(auditor))
        };

        Ok(Collaborators {
            transport: Arc::new(transport),
            ground_truth: Arc::new(ground_truth),
            auditor,
            peers: self.peer_ids(),
        })
    }

    fn check_peers(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for peer in &self.peers {
            if !seen.insert(&peer.id) {
                return Err(FixtureError::DuplicatePeer(peer.id.clone()));
            }
        }
        Ok(())
    }
}
