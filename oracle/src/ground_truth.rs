//! Ground-truth verifier: authoritative re-fetch of a record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use claims::NaturalKey;

/// Authoritative field values for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Record identity
    pub key: NaturalKey,
    /// Field values as currently published by the source
    pub fields: serde_json::Map<String, serde_json::Value>,
    /// When the record was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CanonicalRecord {
    pub fn new(key: NaturalKey, fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            key,
            fields,
            fetched_at: Utc::now(),
        }
    }
}

/// Result of a lookup. A missing record is an answer, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(CanonicalRecord),
    NotFound,
}

/// Error types for ground-truth lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// Source could not be queried
    #[error("Ground truth unavailable: {0}")]
    Unavailable(String),

    /// Source did not answer in time
    #[error("Ground truth lookup timed out")]
    Timeout,

    /// Source answered with something unusable
    #[error("Invalid ground truth response: {0}")]
    Invalid(String),
}

impl LookupError {
    /// Whether retrying the same lookup may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

/// Re-fetches authoritative data by natural key.
///
/// How the record is obtained (scraping, API, cache) is up to the
/// implementation; the validator only compares fields.
#[async_trait]
pub trait GroundTruthVerifier: Send + Sync {
    /// Verifier identifier, used in logs.
    fn id(&self) -> &str;

    /// Look up the current authoritative record.
    async fn lookup(&self, key: &NaturalKey) -> Result<Lookup, LookupError>;
}
