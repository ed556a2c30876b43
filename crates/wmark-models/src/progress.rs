//! Byte-level transfer progress.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of an in-flight transfer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct TransferProgress {
    /// Bytes transferred so far
    pub done_bytes: u64,
    /// Total bytes, `0` when unknown
    pub total_bytes: u64,
    /// Time since the transfer started
    #[serde(with = "duration_millis")]
    #[schemars(with = "u64")]
    pub elapsed: Duration,
}

impl TransferProgress {
    pub fn new(done_bytes: u64, total_bytes: u64, elapsed: Duration) -> Self {
        Self {
            done_bytes,
            total_bytes,
            elapsed,
        }
    }

    /// Percentage complete, `0.0` when the total is unknown.
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        ((self.done_bytes as f64 / self.total_bytes as f64) * 100.0).min(100.0)
    }

    /// Average rate in bytes per second.
    pub fn speed_bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.done_bytes as f64 / secs
    }

    /// Estimated time remaining at the average rate.
    pub fn eta(&self) -> Option<Duration> {
        let speed = self.speed_bytes_per_sec();
        if speed <= 0.0 || self.total_bytes == 0 {
            return None;
        }
        let remaining = self.total_bytes.saturating_sub(self.done_bytes) as f64;
        Some(Duration::from_secs_f64(remaining / speed))
    }

    pub fn is_complete(&self) -> bool {
        self.total_bytes > 0 && self.done_bytes >= self.total_bytes
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_and_eta() {
        let progress = TransferProgress::new(50, 200, Duration::from_secs(5));
        assert!((progress.percentage() - 25.0).abs() < 0.01);
        assert!((progress.speed_bytes_per_sec() - 10.0).abs() < 0.01);
        assert_eq!(progress.eta(), Some(Duration::from_secs(15)));
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_unknown_total() {
        let progress = TransferProgress::new(50, 0, Duration::from_secs(5));
        assert_eq!(progress.percentage(), 0.0);
        assert_eq!(progress.eta(), None);
    }
}
