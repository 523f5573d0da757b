//! Bulk-storage audit: the independently credentialed side path that checks
//! whether a peer's full dataset is bulk-retrievable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use claims::PeerId;

/// What a bulk audit confirmed about one peer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BulkClaimReport {
    /// Bytes the auditor could actually retrieve
    pub bytes_confirmed: u64,
    /// Fraction of retrieved rows that were duplicates (0.0 - 1.0)
    pub duplicate_rate: f64,
}

impl BulkClaimReport {
    /// Audit quality in `[0, 1]`: zero when nothing was confirmed, otherwise
    /// the non-duplicate fraction.
    pub fn quality(&self) -> f64 {
        if self.bytes_confirmed == 0 || !self.duplicate_rate.is_finite() {
            return 0.0;
        }
        (1.0 - self.duplicate_rate).clamp(0.0, 1.0)
    }
}

/// Error types for bulk audits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    /// Peer has not published a bulk dataset
    #[error("No bulk claim published")]
    NoBulkClaim,

    /// Audit backend unavailable
    #[error("Audit unavailable: {0}")]
    Unavailable(String),

    /// Audit did not finish in time
    #[error("Audit timed out")]
    Timeout,
}

#[async_trait]
pub trait BulkStorageAuditor: Send + Sync {
    /// Verify the peer's bulk-retrievable claim.
    async fn verify_bulk_claim(&self, peer: &PeerId) -> Result<BulkClaimReport, AuditError>;
}
