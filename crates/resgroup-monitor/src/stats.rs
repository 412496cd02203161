//! Statistics export for dashboards
//!
//! Aggregates usage samples per group and writes them out as a JSON
//! snapshot.

use chrono::{DateTime, Utc};
use resgroup_core::cgroup::GroupId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::monitor::GroupSample;

/// Complete statistics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStats {
    /// When the monitor started
    pub started_at: DateTime<Utc>,

    /// Timestamp of the latest sample
    pub updated_at: Option<DateTime<Utc>>,

    /// Sampling rounds performed
    pub total_checks: u64,

    /// Per group aggregates
    pub groups: BTreeMap<GroupId, GroupStats>,
}

/// Aggregated usage of one group
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupStats {
    pub samples: u64,
    pub last_cpu_percent: f64,
    pub peak_cpu_percent: f64,
    pub avg_cpu_percent: f64,
    pub last_memory_chunks: i32,
    pub peak_memory_chunks: i32,
    pub memory_limit_chunks: i32,

    /// Samples that carried a CPU percentage
    cpu_samples: u64,
}

impl MonitorStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            updated_at: None,
            total_checks: 0,
            groups: BTreeMap::new(),
        }
    }

    /// Fold a sample into its group's aggregate
    pub fn record(&mut self, sample: &GroupSample) {
        let stats = self.groups.entry(sample.group).or_default();
        stats.samples += 1;
        stats.last_memory_chunks = sample.memory_chunks;
        stats.peak_memory_chunks = stats.peak_memory_chunks.max(sample.memory_chunks);
        stats.memory_limit_chunks = sample.memory_limit_chunks;

        if let Some(percent) = sample.cpu_percent {
            stats.cpu_samples += 1;
            stats.last_cpu_percent = percent;
            stats.peak_cpu_percent = stats.peak_cpu_percent.max(percent);
            stats.avg_cpu_percent +=
                (percent - stats.avg_cpu_percent) / stats.cpu_samples as f64;
        }

        self.updated_at = Some(sample.timestamp);
    }

    /// Runtime in seconds
    pub fn runtime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// Write the snapshot as pretty JSON, replacing the file atomically
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Default for MonitorStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(group: u32, cpu: Option<f64>, memory: i32) -> GroupSample {
        GroupSample {
            group: GroupId(group),
            timestamp: Utc::now(),
            cpu_usage_ns: 0,
            cpu_percent: cpu,
            memory_chunks: memory,
            memory_limit_chunks: 1024,
        }
    }

    #[test]
    fn test_record_aggregates() {
        let mut stats = MonitorStats::new();
        stats.record(&sample(7, None, 10));
        stats.record(&sample(7, Some(20.0), 40));
        stats.record(&sample(7, Some(40.0), 30));

        let group = &stats.groups[&GroupId(7)];
        assert_eq!(group.samples, 3);
        assert_eq!(group.last_cpu_percent, 40.0);
        assert_eq!(group.peak_cpu_percent, 40.0);
        assert!((group.avg_cpu_percent - 30.0).abs() < 1e-9);
        assert_eq!(group.last_memory_chunks, 30);
        assert_eq!(group.peak_memory_chunks, 40);
        assert!(stats.updated_at.is_some());
    }

    #[test]
    fn test_groups_are_separate() {
        let mut stats = MonitorStats::new();
        stats.record(&sample(1, Some(5.0), 1));
        stats.record(&sample(2, Some(50.0), 2));

        assert_eq!(stats.groups.len(), 2);
        assert_eq!(stats.groups[&GroupId(1)].peak_cpu_percent, 5.0);
    }

    #[test]
    fn test_save_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let mut stats = MonitorStats::new();
        stats.total_checks = 3;
        stats.record(&sample(16384, Some(12.5), 64));
        stats.save_to_file(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["total_checks"], 3);
        assert_eq!(json["groups"]["16384"]["peak_memory_chunks"], 64);
        assert!(!dir.path().join("stats.json.tmp").exists());
    }
}
