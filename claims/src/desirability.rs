//! Desirability lookup: how much a validated byte is worth.
//!
//! Combines three multipliers:
//!
//! - **Source weight**: relative value of each external system
//! - **Label weight**: priority of a category tag within a source
//!   (e.g. tiered geographic priority for postal codes)
//! - **Time scalar**: linear freshness decay, `1.0` for brand new data,
//!   `0.5` at the configured maximum age and `0.0` at twice that age

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entity::{DataLabel, DataSource, Entity};
use crate::error::{ClaimsError, Result};

/// Weights for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDesirability {
    /// Multiplier applied to every entity of this source
    pub weight: f64,
    /// Per-label multipliers; labels not listed use the table default
    #[serde(default)]
    pub labels: BTreeMap<String, f64>,
}

impl SourceDesirability {
    pub fn new(weight: f64) -> Self {
        Self {
            weight,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: &str, weight: f64) -> Self {
        self.labels.insert(label.trim().to_lowercase(), weight);
        self
    }
}

/// Static-or-configured priority and freshness table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesirabilityTable {
    /// Weight for sources missing from `sources`
    pub default_source_weight: f64,
    /// Weight for labels missing from a source's label table (and for unlabeled data)
    pub default_label_weight: f64,
    /// Age at which the time scalar reaches 0.5 (seconds)
    pub max_age_secs: u64,
    /// Per-source weights
    pub sources: BTreeMap<DataSource, SourceDesirability>,
}

impl Default for DesirabilityTable {
    fn default() -> Self {
        let mut sources = BTreeMap::new();
        sources.insert(
            DataSource::Zillow,
            SourceDesirability::new(1.0)
                .with_label("zip:10001", 1.5)
                .with_label("zip:94105", 1.5)
                .with_label("zip:60601", 1.25)
                .with_label("zip:73301", 1.25),
        );
        sources.insert(DataSource::Reddit, SourceDesirability::new(0.55));
        sources.insert(DataSource::X, SourceDesirability::new(0.35));
        sources.insert(DataSource::Youtube, SourceDesirability::new(0.1));

        Self {
            default_source_weight: 1.0,
            default_label_weight: 1.0,
            max_age_secs: 30 * 24 * 3600, // 30 days
            sources,
        }
    }
}

impl DesirabilityTable {
    /// A table where every source and label weighs 1.0.
    pub fn uniform(max_age_secs: u64) -> Self {
        Self {
            default_source_weight: 1.0,
            default_label_weight: 1.0,
            max_age_secs,
            sources: BTreeMap::new(),
        }
    }

    /// Load a table from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let table: Self =
            serde_yaml::from_str(yaml).map_err(|e| ClaimsError::Parse(e.to_string()))?;
        table.validate()?;
        Ok(table)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ClaimsError::Parse(e.to_string()))
    }

    /// Reject negative or non-finite weights and a zero freshness horizon.
    pub fn validate(&self) -> Result<()> {
        if self.max_age_secs == 0 {
            return Err(ClaimsError::InvalidMaxAge);
        }
        check_weight("default_source_weight", self.default_source_weight)?;
        check_weight("default_label_weight", self.default_label_weight)?;
        for (source, desirability) in &self.sources {
            check_weight(source.as_str(), desirability.weight)?;
            for (label, weight) in &desirability.labels {
                check_weight(&format!("{}/{}", source, label), *weight)?;
            }
        }
        Ok(())
    }

    pub fn source_weight(&self, source: DataSource) -> f64 {
        self.sources
            .get(&source)
            .map(|s| s.weight)
            .unwrap_or(self.default_source_weight)
    }

    pub fn label_weight(&self, source: DataSource, label: Option<&DataLabel>) -> f64 {
        label
            .and_then(|label| {
                self.sources
                    .get(&source)
                    .and_then(|s| s.labels.get(label.as_str()))
            })
            .copied()
            .unwrap_or(self.default_label_weight)
    }

    /// Freshness multiplier for data of the given age.
    pub fn time_scalar(&self, age: Duration) -> f64 {
        time_scalar(age.num_seconds(), self.max_age_secs)
    }

    /// `source_weight × label_weight × time_scalar` for one entity.
    pub fn entity_weight(&self, entity: &Entity, now: DateTime<Utc>) -> f64 {
        self.source_weight(entity.source)
            * self.label_weight(entity.source, entity.label.as_ref())
            * self.time_scalar(now - entity.timestamp)
    }
}

/// Linear freshness decay: `1 - age / (2 × max_age)`, clamped to `[0, 1]`.
///
/// Negative ages (timestamps in the future) are treated as zero.
pub fn time_scalar(age_secs: i64, max_age_secs: u64) -> f64 {
    let age = age_secs.max(0) as f64;
    if max_age_secs == 0 {
        return if age == 0.0 { 1.0 } else { 0.0 };
    }
    let horizon = 2.0 * max_age_secs as f64;
    (1.0 - age / horizon).clamp(0.0, 1.0)
}

fn check_weight(what: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ClaimsError::InvalidWeight {
            what: what.to_string(),
            value,
        })
    }
}
