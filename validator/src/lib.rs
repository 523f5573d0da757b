//! Validator - sampling, validation, credibility and scoring of data peers
//!
//! Periodically evaluates untrusted peers that claim to hold scraped data:
//! a size-weighted sample of each peer's claimed buckets is checked in three
//! tiers, outcomes feed a slow-moving credibility score, and once every peer
//! of a cycle has been evaluated the scorer turns validated bytes into
//! reward shares.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     CycleScheduler                       │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ run_cycle
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │ Validator                                                │
//! │  phase 1 (per peer, concurrent)                          │
//! │    PeerIndexStore ─► Sampler ─► ValidationEngine ─►      │
//! │    CredibilityTracker                                    │
//! │  phase 2 (barrier)                                       │
//! │    Scorer ─► IncentiveShares ─► WeightSink               │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod credibility;
pub mod engine;
pub mod retry;
pub mod sampler;
pub mod scheduler;
pub mod scorer;
pub mod state;
pub mod store;
pub mod types;
pub mod validation;

// Re-export main types for convenience
pub use config::{
    CredibilityConfig, OutcomeBasis, SamplingConfig, SchedulerConfig, ScoringConfig,
    ValidationConfig, ValidatorConfig,
};
pub use credibility::CredibilityTracker;
pub use engine::{CycleReport, Validator, ValidatorBuilder};
pub use retry::RetryPolicy;
pub use sampler::{SampleSeed, Sampler};
pub use scheduler::CycleScheduler;
pub use scorer::{scorable_bytes, uniqueness_counts, PeerScore, ScoreTable, Scorer, ScoringError};
pub use state::ValidatorState;
pub use store::{PeerEntry, PeerIndexStore, PeerLocks};
pub use types::{FailureReason, PeerCycleResult, Result, Stage, ValidationOutcome, ValidatorError};
pub use validation::{BucketValidation, ValidationEngine};
