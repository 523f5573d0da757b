//! Oracle - collaborator boundary of the validator
//!
//! Everything the validator talks to but does not own lives behind a trait
//! here:
//!
//! - [`PeerTransport`]: index and bucket requests to peers
//! - [`GroundTruthVerifier`]: authoritative re-fetch of a record by natural key
//! - [`BulkStorageAuditor`]: optional bulk-retrievability audit
//! - [`WeightSink`]: consumer of the final incentive shares
//!
//! It also owns the comparison semantics used against ground truth:
//! per-source [`RecordSchema`]s classify fields as identity, volatile,
//! estimate or status, and [`compare_record`] applies the differentiated
//! tolerance rules.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  Validator                   │
//! └──────┬──────────────┬──────────────┬─────────┘
//!        │              │              │
//!        ▼              ▼              ▼
//! ┌─────────────┐ ┌─────────────┐ ┌─────────────┐
//! │PeerTransport│ │ GroundTruth │ │ WeightSink  │
//! │             │ │ + Schemas   │ │             │
//! └─────────────┘ └─────────────┘ └─────────────┘
//! ```

pub mod audit;
pub mod compare;
pub mod ground_truth;
pub mod mock;
pub mod schema;
pub mod transport;
pub mod weights;

// Re-export main types for convenience
pub use audit::{AuditError, BulkClaimReport, BulkStorageAuditor};
pub use compare::{compare_record, parse_content, relative_deviation, FieldDiscrepancy, Tolerances};
pub use ground_truth::{CanonicalRecord, GroundTruthVerifier, Lookup, LookupError};
pub use schema::{FieldClass, FieldKind, FieldSpec, RecordSchema, SchemaCatalog, StatusTransitions};
pub use transport::{PeerTransport, TransportError};
pub use weights::{IncentiveShares, LoggingSink, SinkError, WeightSink};
