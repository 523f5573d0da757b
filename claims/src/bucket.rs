//! Bucket keys and fixed-width time quantization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{DataLabel, DataSource};

/// A fixed-width window of time, identified by its index since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeBucket {
    pub id: i64,
}

impl TimeBucket {
    /// One hour.
    pub const DEFAULT_WIDTH_SECS: u64 = 3600;

    pub fn new(id: i64) -> Self {
        Self { id }
    }

    /// Quantize a timestamp into its bucket.
    pub fn from_datetime(timestamp: DateTime<Utc>, width_secs: u64) -> Self {
        let width = width_secs.max(1) as i64;
        Self {
            id: timestamp.timestamp().div_euclid(width),
        }
    }

    /// First instant inside the bucket.
    pub fn start(&self, width_secs: u64) -> DateTime<Utc> {
        let width = width_secs.max(1) as i64;
        DateTime::from_timestamp(self.id.saturating_mul(width), 0).unwrap_or_default()
    }

    /// First instant after the bucket.
    pub fn end(&self, width_secs: u64) -> DateTime<Utc> {
        Self::new(self.id.saturating_add(1)).start(width_secs)
    }

    pub fn contains(&self, timestamp: DateTime<Utc>, width_secs: u64) -> bool {
        Self::from_datetime(timestamp, width_secs) == *self
    }
}

/// Aggregation key: `(source, label, time bucket)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketId {
    pub source: DataSource,
    #[serde(default)]
    pub label: Option<DataLabel>,
    pub time_bucket: TimeBucket,
}

/// A peer's self-reported summary of one bucket. Unverified until sampled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: BucketId,
    pub entity_count: u64,
    pub total_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_bucket_bounds() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 16, 13, 45, 10).unwrap();
        let bucket = TimeBucket::from_datetime(ts, TimeBucket::DEFAULT_WIDTH_SECS);

        assert_eq!(
            bucket.start(TimeBucket::DEFAULT_WIDTH_SECS),
            Utc.with_ymd_and_hms(2026, 10, 16, 13, 0, 0).unwrap()
        );
        assert_eq!(
            bucket.end(TimeBucket::DEFAULT_WIDTH_SECS),
            Utc.with_ymd_and_hms(2026, 10, 16, 14, 0, 0).unwrap()
        );
        assert!(bucket.contains(ts, TimeBucket::DEFAULT_WIDTH_SECS));
        assert!(!bucket.contains(
            Utc.with_ymd_and_hms(2026, 10, 16, 14, 0, 0).unwrap(),
            TimeBucket::DEFAULT_WIDTH_SECS
        ));
    }

    #[test]
    fn test_pre_epoch_timestamps_floor() {
        let ts = DateTime::from_timestamp(-1, 0).unwrap();
        assert_eq!(TimeBucket::from_datetime(ts, 3600).id, -1);
    }
}
