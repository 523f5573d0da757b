//! Incentive share table and the sink that commits it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use claims::PeerId;

/// Final reward shares for one cycle: `peer -> share`, shares in `[0, 1]`
/// summing to 1.0 (or all zero when nobody earned anything).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IncentiveShares {
    /// Cycle that produced the table
    pub cycle_id: u64,
    /// Share per peer
    pub shares: BTreeMap<PeerId, f64>,
}

impl IncentiveShares {
    pub fn new(cycle_id: u64, shares: BTreeMap<PeerId, f64>) -> Self {
        Self { cycle_id, shares }
    }

    pub fn get(&self, peer: &PeerId) -> f64 {
        self.shares.get(peer).copied().unwrap_or(0.0)
    }

    /// Sum of all shares.
    pub fn total(&self) -> f64 {
        self.shares.values().sum()
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

/// Error types for publishing shares.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Commit was rejected
    #[error("Publish rejected: {0}")]
    Rejected(String),

    /// Sink backend unavailable
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Consumer of the incentive share table (e.g. an on-chain weight setter).
#[async_trait]
pub trait WeightSink: Send + Sync {
    async fn publish(&self, shares: &IncentiveShares) -> Result<(), SinkError>;
}

/// Sink that only logs the table.
pub struct LoggingSink;

#[async_trait]
impl WeightSink for LoggingSink {
    async fn publish(&self, shares: &IncentiveShares) -> Result<(), SinkError> {
        for (peer, share) in &shares.shares {
            info!(
                cycle_id = shares.cycle_id,
                peer_id = %peer,
                share = *share,
                "Incentive share"
            );
        }
        info!(
            cycle_id = shares.cycle_id,
            peers = shares.len(),
            total = shares.total(),
            "Incentive shares published"
        );
        Ok(())
    }
}
