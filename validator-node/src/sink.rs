//! Weight sink that appends each cycle's share table to a JSON-lines file.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::info;

use oracle::{IncentiveShares, SinkError, WeightSink};

pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl WeightSink for JsonLinesSink {
    async fn publish(&self, shares: &IncentiveShares) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_string(shares).map_err(|e| SinkError::Rejected(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        info!(
            cycle_id = shares.cycle_id,
            peers = shares.len(),
            path = %self.path.display(),
            "Shares written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::PeerId;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_appends_one_line_per_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shares.jsonl");
        let sink = JsonLinesSink::new(&path);

        for cycle_id in 1..=2 {
            let shares = IncentiveShares::new(cycle_id, BTreeMap::from([(PeerId::from("a"), 1.0)]));
            sink.publish(&shares).await.unwrap();
        }

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<IncentiveShares> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].cycle_id, 2);
    }
}
