use chrono::{DateTime, Utc};
use resgroup_core::cgroup::{CgroupError, CgroupOps, GroupId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, warn};

use crate::stats::MonitorStats;

/// One usage reading of a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSample {
    pub group: GroupId,
    pub timestamp: DateTime<Utc>,

    /// Cumulative CPU time in nanoseconds
    pub cpu_usage_ns: i64,

    /// Share of the engine's CPU allotment since the previous sample,
    /// `None` on the first reading of a group
    pub cpu_percent: Option<f64>,

    pub memory_chunks: i32,
    pub memory_limit_chunks: i32,
}

/// Periodic CPU and memory sampler over a set of groups
///
/// Keeps the previous cumulative CPU reading per group and turns the
/// delta into a percentage through the backend's conversion.
pub struct UsageMonitor {
    ops: Box<dyn CgroupOps>,
    groups: Vec<GroupId>,
    previous: HashMap<GroupId, (i64, Instant)>,
    stats: MonitorStats,
    cpu_warn_percent: f64,
}

impl UsageMonitor {
    /// `ops` must have passed `probe` and `check`
    pub fn new(ops: Box<dyn CgroupOps>, groups: Vec<GroupId>) -> Self {
        Self {
            ops,
            groups,
            previous: HashMap::new(),
            stats: MonitorStats::new(),
            cpu_warn_percent: 90.0,
        }
    }

    pub fn with_cpu_warn_percent(mut self, percent: f64) -> Self {
        self.cpu_warn_percent = percent;
        self
    }

    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    /// Sample every group once
    ///
    /// Groups that vanished since the last round are skipped with a
    /// warning; any other driver error aborts the round.
    pub fn sample(&mut self) -> Result<Vec<GroupSample>, CgroupError> {
        self.sample_at(Instant::now())
    }

    pub(crate) fn sample_at(&mut self, now: Instant) -> Result<Vec<GroupSample>, CgroupError> {
        let mut samples = Vec::with_capacity(self.groups.len());

        for group in self.groups.clone() {
            match self.sample_group(group, now) {
                Ok(sample) => {
                    self.stats.record(&sample);
                    samples.push(sample);
                }
                Err(e) if e.is_not_found() => {
                    warn!("Group {} is gone, skipping: {}", group, e);
                    self.previous.remove(&group);
                }
                Err(e) => return Err(e),
            }
        }

        self.stats.total_checks += 1;
        Ok(samples)
    }

    fn sample_group(&mut self, group: GroupId, now: Instant) -> Result<GroupSample, CgroupError> {
        let cpu_usage_ns = self.ops.get_cpu_usage(group)?;
        let memory_chunks = self.ops.get_memory_usage(group)?;
        let memory_limit_chunks = self.ops.get_memory_limit_chunks(group)?;

        // a counter that went backwards means the group was recreated, so
        // this reading becomes the new baseline
        let cpu_percent = match self.previous.get(&group) {
            Some(&(usage, at)) if cpu_usage_ns >= usage => {
                let elapsed = now.saturating_duration_since(at).as_micros() as i64;
                if elapsed > 0 {
                    Some(self.ops.convert_cpu_usage(cpu_usage_ns - usage, elapsed)?)
                } else {
                    None
                }
            }
            Some(_) => {
                debug!("Group {} CPU counter reset, new baseline", group);
                None
            }
            None => None,
        };
        self.previous.insert(group, (cpu_usage_ns, now));

        if let Some(percent) = cpu_percent {
            if percent > self.cpu_warn_percent {
                warn!(
                    "Group {} CPU usage {:.1}% above {:.1}%",
                    group, percent, self.cpu_warn_percent
                );
            }
        }
        debug!(
            "Group {}: cpu={}ns memory={} chunks",
            group, cpu_usage_ns, memory_chunks
        );

        Ok(GroupSample {
            group,
            timestamp: Utc::now(),
            cpu_usage_ns,
            cpu_percent,
            memory_chunks,
            memory_limit_chunks,
        })
    }
}
