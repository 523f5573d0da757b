//! Core types for the validator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use claims::{BucketId, Entity, EquivalenceKey, PeerId};
use oracle::{BulkClaimReport, FieldDiscrepancy};

use crate::scorer::ScoringError;

/// Where in a peer's evaluation a call was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Index refresh
    Index,
    /// Bucket fetch and quantity checks
    Tier1,
    /// Ground-truth cross-check
    Tier3,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Index => "index",
            Self::Tier1 => "tier1",
            Self::Tier3 => "tier3",
        };
        f.write_str(name)
    }
}

/// Why a sample failed validation.
///
/// Every reason is recoverable: it lowers the peer's outcome for the cycle
/// and never aborts the cycle itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// Peer or collaborator could not be reached
    Unreachable,
    /// A call exceeded its timeout
    Timeout { stage: Stage },
    /// Tier 1: claimed bucket totals disagree with what the peer returned
    InconsistentIndex { detail: String },
    /// Tier 2: entity is structurally broken
    MalformedEntity { detail: String },
    /// Tier 3: ground truth has no such record
    NotFoundInGroundTruth,
    /// Tier 3: identity field differs
    FieldMismatch { field: String },
    /// Tier 3: volatile or estimate field outside tolerance
    ToleranceExceeded { field: String, deviation: f64 },
    /// Tier 3: status moved backwards or sideways
    InvalidStatusTransition { from: String, to: String },
}

impl FailureReason {
    pub fn inconsistent(detail: impl Into<String>) -> Self {
        Self::InconsistentIndex {
            detail: detail.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedEntity {
            detail: detail.into(),
        }
    }
}

impl From<FieldDiscrepancy> for FailureReason {
    fn from(discrepancy: FieldDiscrepancy) -> Self {
        match discrepancy {
            FieldDiscrepancy::Mismatch { field } => Self::FieldMismatch { field },
            FieldDiscrepancy::ToleranceExceeded { field, deviation } => {
                Self::ToleranceExceeded { field, deviation }
            }
            FieldDiscrepancy::InvalidStatusTransition { from, to, .. } => {
                Self::InvalidStatusTransition { from, to }
            }
        }
    }
}

/// Result of checking one sampled entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Sampled entity
    pub uri: String,
    /// Whether it passed every tier
    pub is_valid: bool,
    /// Failure reason, if any
    pub reason: Option<FailureReason>,
    /// Bytes credited (0 when invalid)
    pub bytes_validated: u64,
    /// Bytes the peer claimed for the entity
    pub claimed_bytes: u64,
}

impl ValidationOutcome {
    pub fn passed(entity: &Entity) -> Self {
        Self {
            uri: entity.uri.clone(),
            is_valid: true,
            reason: None,
            bytes_validated: entity.content_size_bytes,
            claimed_bytes: entity.content_size_bytes,
        }
    }

    pub fn failed(entity: &Entity, reason: FailureReason) -> Self {
        Self {
            uri: entity.uri.clone(),
            is_valid: false,
            reason: Some(reason),
            bytes_validated: 0,
            claimed_bytes: entity.content_size_bytes,
        }
    }
}

/// Everything phase 1 learned about one peer in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerCycleResult {
    pub peer_id: PeerId,
    /// Peer answered its index request
    pub responsive: bool,
    /// Why the index refresh failed, when it did
    pub index_failure: Option<FailureReason>,
    /// Bucket that was sampled, if any
    pub sampled_bucket: Option<BucketId>,
    /// Per-entity outcomes
    pub outcomes: Vec<ValidationOutcome>,
    /// Bucket-level failure that stopped validation before Tier 2
    pub tier1_failure: Option<FailureReason>,
    /// Every entity the sampled bucket holds, keyed for uniqueness
    pub claimed_keys: BTreeSet<EquivalenceKey>,
    /// Entities that passed all three tiers
    pub validated: Vec<Entity>,
    /// Outcome fed to the credibility tracker (None when no update happened)
    pub outcome: Option<f64>,
    /// Credibility after this cycle's update
    pub credibility: f64,
    /// Storage-audit credibility after this cycle's update
    pub storage_credibility: f64,
    /// Bulk audit report, when the audit path confirmed anything
    pub storage_report: Option<BulkClaimReport>,
}

impl PeerCycleResult {
    /// A result with nothing sampled.
    pub fn empty(peer_id: PeerId, responsive: bool, credibility: f64) -> Self {
        Self {
            peer_id,
            responsive,
            index_failure: None,
            sampled_bucket: None,
            outcomes: Vec::new(),
            tier1_failure: None,
            claimed_keys: BTreeSet::new(),
            validated: Vec::new(),
            outcome: None,
            credibility,
            storage_credibility: 0.0,
            storage_report: None,
        }
    }

    /// Bytes that passed validation.
    pub fn validated_bytes(&self) -> u64 {
        self.outcomes.iter().map(|o| o.bytes_validated).sum()
    }
}

/// Error types for the validator.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// State snapshot could not be read or written
    #[error("State error: {0}")]
    State(String),

    /// Scoring failed after all retries
    #[error("Scoring failed: {0}")]
    Scoring(#[from] ScoringError),

    /// Peer is not registered
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ValidatorError>;
