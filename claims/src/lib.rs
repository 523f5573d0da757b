//! Claims - the data model for peer-reported datasets
//!
//! A peer claims to hold many [`Entity`] records. It reports them to the
//! validator as an index of coarse [`Bucket`]s keyed by
//! `(source, label, time bucket)`; the validator samples those buckets,
//! verifies a handful of entities, and scores the peer.
//!
//! This crate holds the pieces every other layer shares:
//!
//! - **Entities**: claimed records, their natural keys and the equivalence
//!   relation used for cross-peer duplicate detection
//! - **Buckets**: fixed-width time quantization and the bucket key
//! - **Peer indexes**: the self-reported bucket summary of one peer
//! - **Desirability**: source/label priority multipliers and freshness decay
//!
//! # Example
//!
//! ```ignore
//! use claims::{DesirabilityTable, Entity, PeerIndex};
//!
//! let index = PeerIndex::from_entities("peer-1".into(), &entities, 3600, Utc::now());
//! let weight = DesirabilityTable::default().entity_weight(&entities[0], Utc::now());
//! ```

pub mod bucket;
pub mod desirability;
pub mod entity;
pub mod error;
pub mod index;

pub use bucket::{Bucket, BucketId, TimeBucket};
pub use desirability::{time_scalar, DesirabilityTable, SourceDesirability};
pub use entity::{are_equivalent, normalize_uri, DataLabel, DataSource, Entity, Equivalence, EquivalenceKey, NaturalKey};
pub use error::{ClaimsError, Result};
pub use index::{PeerId, PeerIndex};
