//! Tier 2: structural completeness of one sampled entity.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use claims::Entity;
use oracle::{parse_content, SchemaCatalog};

use crate::types::FailureReason;

/// Per-entity structural check. Failure invalidates only that entity.
#[derive(Debug, Clone)]
pub struct StructureCheck {
    /// How far in the future a timestamp may be (seconds)
    pub max_clock_skew_secs: u64,
}

impl StructureCheck {
    /// Check the entity and return its parsed fields for Tier 3.
    pub fn check(
        &self,
        entity: &Entity,
        schemas: &SchemaCatalog,
        now: DateTime<Utc>,
    ) -> Result<Map<String, Value>, FailureReason> {
        if entity.uri.trim().is_empty() {
            return Err(FailureReason::malformed("empty uri"));
        }
        if !entity.source.is_recognized() {
            return Err(FailureReason::malformed("unrecognized source"));
        }
        if let Some(label) = &entity.label {
            if !entity.source.accepts_label(label) {
                return Err(FailureReason::malformed(format!(
                    "label '{}' not valid for {}",
                    label.as_str(),
                    entity.source
                )));
            }
        }
        if !entity.size_matches_content() {
            return Err(FailureReason::malformed(format!(
                "content_size_bytes {} but payload is {} bytes",
                entity.content_size_bytes,
                entity.content.len()
            )));
        }

        let skew = Duration::seconds(i64::try_from(self.max_clock_skew_secs).unwrap_or(i64::MAX));
        if entity.timestamp > now + skew {
            return Err(FailureReason::malformed(format!(
                "timestamp {} is in the future",
                entity.timestamp
            )));
        }

        let fields = parse_content(entity).map_err(FailureReason::malformed)?;
        let schema = schemas
            .get(entity.source)
            .ok_or_else(|| FailureReason::malformed(format!("no schema for {}", entity.source)))?;
        schema
            .check_structure(&fields)
            .map_err(FailureReason::malformed)?;

        Ok(fields)
    }
}
