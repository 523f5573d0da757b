//! Persistent validator state: trust history that survives restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use claims::PeerId;

use crate::types::{Result, ValidatorError};

/// Snapshot of everything a restarted validator needs to keep.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidatorState {
    /// Primary credibility per peer
    pub credibility: BTreeMap<PeerId, f64>,
    /// Storage-audit credibility per peer
    #[serde(default)]
    pub storage_credibility: BTreeMap<PeerId, f64>,
    /// Last completed cycle
    pub last_cycle_id: u64,
    /// When the snapshot was taken
    pub saved_at: DateTime<Utc>,
}

impl ValidatorState {
    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ValidatorError::State(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ValidatorError::State(e.to_string()))
    }

    /// Write the snapshot, replacing any previous file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        // Write next to the target, then rename over it.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }
}
