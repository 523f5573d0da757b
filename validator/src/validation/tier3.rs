//! Tier 3: cross-check against ground truth.

use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use claims::Entity;
use oracle::{compare_record, GroundTruthVerifier, Lookup, LookupError, RecordSchema, Tolerances};

use crate::retry::RetryPolicy;
use crate::types::{FailureReason, Stage};

/// Ground-truth lookup by natural key followed by differentiated field
/// comparison.
#[derive(Debug, Clone)]
pub struct GroundTruthCheck {
    /// Per-attempt lookup timeout
    pub timeout: Duration,
    /// Retries for transient lookup failures
    pub retry: RetryPolicy,
    /// Field tolerances
    pub tolerances: Tolerances,
}

impl GroundTruthCheck {
    pub async fn check(
        &self,
        verifier: &dyn GroundTruthVerifier,
        schema: &RecordSchema,
        entity: &Entity,
        claimed: &Map<String, Value>,
    ) -> Result<(), FailureReason> {
        let key = entity.natural_key();
        let timeout = self.timeout;
        let key_ref = &key;

        let lookup = self
            .retry
            .run(
                || async move {
                    match tokio::time::timeout(timeout, verifier.lookup(key_ref)).await {
                        Ok(result) => result,
                        Err(_) => Err(LookupError::Timeout),
                    }
                },
                LookupError::is_transient,
            )
            .await;

        let record = match lookup {
            Ok(Lookup::Found(record)) => record,
            Ok(Lookup::NotFound) => return Err(FailureReason::NotFoundInGroundTruth),
            Err(LookupError::Timeout) => {
                return Err(FailureReason::Timeout {
                    stage: Stage::Tier3,
                })
            }
            Err(e) => {
                debug!(
                    verifier = verifier.id(),
                    key = %key,
                    error = %e,
                    "Ground truth lookup failed"
                );
                return Err(FailureReason::Unreachable);
            }
        };

        compare_record(schema, claimed, &record, &self.tolerances).map_err(FailureReason::from)
    }
}
