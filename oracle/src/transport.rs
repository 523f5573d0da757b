//! Peer transport: how the validator reaches a peer.

use async_trait::async_trait;
use claims::{BucketId, Entity, PeerId, PeerIndex};

/// Error types for peer requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Peer could not be reached
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    /// Peer did not answer in time
    #[error("Peer request timed out")]
    Timeout,

    /// Peer answered with something unusable
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout)
    }
}

/// Remote calls into a peer.
///
/// Implementations need not enforce timeouts; the validator wraps every call
/// in its own deadline.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Fetch the peer's current bucket index.
    async fn get_index(&self, peer: &PeerId) -> Result<PeerIndex, TransportError>;

    /// Fetch every entity the peer holds in one bucket.
    async fn get_bucket_entities(
        &self,
        peer: &PeerId,
        bucket: &BucketId,
    ) -> Result<Vec<Entity>, TransportError>;
}
