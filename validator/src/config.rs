//! Configuration for the validator.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use claims::{DesirabilityTable, Equivalence, TimeBucket};
use oracle::Tolerances;

use crate::retry::RetryPolicy;
use crate::types::{Result, ValidatorError};

/// Largest sample size a single peer can be asked for per cycle.
pub const MAX_SAMPLES_PER_PEER: usize = 20;

/// Configuration for a validator instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Cycle scheduling
    pub scheduler: SchedulerConfig,
    /// Bucket and entity sampling
    pub sampling: SamplingConfig,
    /// Validation tiers
    pub validation: ValidationConfig,
    /// Credibility tracking
    pub credibility: CredibilityConfig,
    /// Score aggregation
    pub scoring: ScoringConfig,
    /// Priority and freshness weights
    pub desirability: DesirabilityTable,
}

impl ValidatorConfig {
    /// Settings for local runs and tests: no minimum interval, short
    /// timeouts and near-instant retries.
    pub fn test_mode() -> Self {
        let mut config = Self::default();
        config.scheduler.min_interval_secs = 0;
        config.validation.index_timeout_ms = 500;
        config.validation.bucket_timeout_ms = 500;
        config.validation.lookup_timeout_ms = 500;
        config.validation.audit_timeout_ms = 500;
        config.validation.retry_delay_ms = 1;
        config
    }

    /// Load config from YAML, validating the result.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ValidatorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ValidatorError::Config(e.to_string()))
    }

    /// Set samples per peer.
    pub fn with_samples_per_peer(mut self, samples: usize) -> Self {
        self.sampling.samples_per_peer = samples;
        self
    }

    /// Set the credibility learning rate, exponent and starting value.
    pub fn with_credibility(mut self, alpha: f64, exponent: f64, initial: f64) -> Self {
        self.credibility.alpha = alpha;
        self.credibility.exponent = exponent;
        self.credibility.initial = initial;
        self
    }

    /// Set the desirability table.
    pub fn with_desirability(mut self, desirability: DesirabilityTable) -> Self {
        self.desirability = desirability;
        self
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.max_concurrent_peers == 0 {
            return Err(config_error("scheduler.max_concurrent_peers must be at least 1"));
        }

        let sm = &self.sampling;
        if !(1..=MAX_SAMPLES_PER_PEER).contains(&sm.samples_per_peer) {
            return Err(config_error(format!(
                "sampling.samples_per_peer must be in 1..={}, got {}",
                MAX_SAMPLES_PER_PEER, sm.samples_per_peer
            )));
        }
        if sm.time_bucket_width_secs == 0 {
            return Err(config_error("sampling.time_bucket_width_secs must be positive"));
        }
        if sm.max_buckets_per_index == 0 {
            return Err(config_error("sampling.max_buckets_per_index must be positive"));
        }

        let v = &self.validation;
        for (name, value) in [
            ("index_timeout_ms", v.index_timeout_ms),
            ("bucket_timeout_ms", v.bucket_timeout_ms),
            ("lookup_timeout_ms", v.lookup_timeout_ms),
            ("audit_timeout_ms", v.audit_timeout_ms),
        ] {
            if value == 0 {
                return Err(config_error(format!("validation.{} must be positive", name)));
            }
        }
        for (name, value) in [
            ("size_tolerance", v.size_tolerance),
            ("tolerances.volatile", v.tolerances.volatile),
            ("tolerances.estimate", v.tolerances.estimate),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(config_error(format!(
                    "validation.{} must be a non-negative fraction, got {}",
                    name, value
                )));
            }
        }

        let c = &self.credibility;
        for (name, value) in [("alpha", c.alpha), ("storage_alpha", c.storage_alpha)] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(config_error(format!(
                    "credibility.{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if !c.exponent.is_finite() || c.exponent < 0.0 {
            return Err(config_error(format!(
                "credibility.exponent must be non-negative, got {}",
                c.exponent
            )));
        }
        if !(0.0..=1.0).contains(&c.initial) {
            return Err(config_error(format!(
                "credibility.initial must be in [0, 1], got {}",
                c.initial
            )));
        }

        let sc = &self.scoring;
        if !sc.storage_boost_per_byte.is_finite() || sc.storage_boost_per_byte < 0.0 {
            return Err(config_error("scoring.storage_boost_per_byte must be non-negative"));
        }
        if !sc.max_storage_boost.is_finite() || sc.max_storage_boost < 0.0 {
            return Err(config_error("scoring.max_storage_boost must be non-negative"));
        }

        self.desirability
            .validate()
            .map_err(|e| config_error(format!("desirability: {}", e)))
    }
}

fn config_error(message: impl Into<String>) -> ValidatorError {
    ValidatorError::Config(message.into())
}

/// Cycle scheduling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum time between two evaluations of the same peer (seconds)
    pub min_interval_secs: u64,
    /// Maximum peers evaluated concurrently
    pub max_concurrent_peers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 3600, // 1 hour
            max_concurrent_peers: 16,
        }
    }
}

impl SchedulerConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

/// Sampling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Entities deep-validated per peer per cycle
    pub samples_per_peer: usize,
    /// Width of a time bucket (seconds)
    pub time_bucket_width_secs: u64,
    /// Buckets kept per peer index; larger indexes keep their biggest buckets
    pub max_buckets_per_index: usize,
    /// Largest bucket a peer may claim (bytes)
    pub max_bucket_size_bytes: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            samples_per_peer: 10,
            time_bucket_width_secs: TimeBucket::DEFAULT_WIDTH_SECS,
            max_buckets_per_index: 350_000,
            max_bucket_size_bytes: 128 * 1024 * 1024, // 128 MiB
        }
    }
}

/// Whether the credibility outcome counts passed entities or passed bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeBasis {
    #[default]
    Entities,
    Bytes,
}

/// Validation tier configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Index request timeout (ms)
    pub index_timeout_ms: u64,
    /// Bucket fetch timeout (ms)
    pub bucket_timeout_ms: u64,
    /// Per-attempt ground-truth lookup timeout (ms)
    pub lookup_timeout_ms: u64,
    /// Bulk audit timeout (ms)
    pub audit_timeout_ms: u64,
    /// Retries for transient index and lookup failures
    pub retry_count: u32,
    /// Base delay between retries, grows linearly per attempt (ms)
    pub retry_delay_ms: u64,
    /// Allowed relative gap between claimed and actual bucket totals
    pub size_tolerance: f64,
    /// How far in the future an entity timestamp may be (seconds)
    pub max_clock_skew_secs: u64,
    /// Field tolerances for ground-truth comparison
    pub tolerances: Tolerances,
    /// What the credibility outcome fraction is measured in
    pub outcome_basis: OutcomeBasis,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            index_timeout_ms: 10_000,
            bucket_timeout_ms: 30_000,
            lookup_timeout_ms: 15_000,
            audit_timeout_ms: 30_000,
            retry_count: 2,
            retry_delay_ms: 500,
            size_tolerance: 0.10,
            max_clock_skew_secs: 300,
            tolerances: Tolerances::default(),
            outcome_basis: OutcomeBasis::Entities,
        }
    }
}

impl ValidationConfig {
    pub fn index_timeout(&self) -> Duration {
        Duration::from_millis(self.index_timeout_ms)
    }

    pub fn bucket_timeout(&self) -> Duration {
        Duration::from_millis(self.bucket_timeout_ms)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn audit_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_count, Duration::from_millis(self.retry_delay_ms))
    }
}

/// Credibility configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredibilityConfig {
    /// EMA learning rate
    pub alpha: f64,
    /// Exponent applied to credibility in the final score
    pub exponent: f64,
    /// Credibility of a peer on first contact
    pub initial: f64,
    /// EMA learning rate of the storage-audit track
    pub storage_alpha: f64,
}

impl Default for CredibilityConfig {
    fn default() -> Self {
        Self {
            alpha: 0.15,
            exponent: 2.5,
            initial: 0.0,
            storage_alpha: 0.15,
        }
    }
}

/// Score aggregation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// When two claimed entities count as the same record
    pub equivalence: Equivalence,
    /// Boost earned per confirmed bulk byte
    pub storage_boost_per_byte: f64,
    /// Upper bound on the storage boost
    pub max_storage_boost: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            equivalence: Equivalence::NaturalKey,
            storage_boost_per_byte: 0.01,
            max_storage_boost: 1_000_000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ValidatorConfig::default().validate().is_ok());
        assert!(ValidatorConfig::test_mode().validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = ValidatorConfig::default().with_samples_per_peer(5);
        let yaml = config.to_yaml().unwrap();
        let parsed = ValidatorConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
credibility:
  alpha: 0.3
validation:
  outcome_basis: bytes
"#;
        let config = ValidatorConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.credibility.alpha, 0.3);
        assert_eq!(config.credibility.exponent, 2.5);
        assert_eq!(config.validation.outcome_basis, OutcomeBasis::Bytes);
        assert_eq!(config.sampling.samples_per_peer, 10);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let too_many = ValidatorConfig::default().with_samples_per_peer(21);
        assert!(matches!(too_many.validate(), Err(ValidatorError::Config(_))));

        let zero = ValidatorConfig::default().with_samples_per_peer(0);
        assert!(zero.validate().is_err());

        let bad_alpha = ValidatorConfig::default().with_credibility(0.0, 2.5, 0.0);
        assert!(bad_alpha.validate().is_err());

        let bad_initial = ValidatorConfig::default().with_credibility(0.15, 2.5, 1.5);
        assert!(bad_initial.validate().is_err());

        let mut bad_tolerance = ValidatorConfig::default();
        bad_tolerance.validation.tolerances.volatile = -0.1;
        assert!(bad_tolerance.validate().is_err());
    }
}
