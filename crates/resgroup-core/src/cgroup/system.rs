//! Host and system-wide CPU information

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::System;

use super::error::{CgroupError, Result};

/// Default `cpu.cfs_period_us` written when the kernel reports 0
pub const DEFAULT_CPU_PERIOD_US: i64 = 100_000;

const MB: u64 = 1024 * 1024;

/// Physical resources of the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResources {
    pub ncores: u32,
    /// Bytes
    pub total_ram: u64,
    /// Bytes
    pub total_swap: u64,
}

impl HostResources {
    /// Query the running host
    pub fn detect() -> Result<Self> {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu();

        let ncores = sys.cpus().len() as u32;
        let total_ram = sys.total_memory();
        if ncores == 0 || total_ram == 0 {
            return Err(CgroupError::HostInfo(format!(
                "cores: {}, ram: {}",
                ncores, total_ram
            )));
        }

        Ok(Self {
            ncores,
            total_ram,
            total_swap: sys.total_swap(),
        })
    }
}

/// CPU facts computed once by the check phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub ncores: u32,
    pub cfs_period_us: i64,
    /// `cfs_period_us * ncores`
    pub system_cfs_quota_us: i64,
    /// Quota of the enclosing cgroup, `<= 0` when unlimited
    pub parent_cfs_quota_us: i64,
}

impl SystemInfo {
    pub fn new(ncores: u32, cfs_period_us: i64, parent_cfs_quota_us: i64) -> Self {
        Self {
            ncores,
            cfs_period_us,
            system_cfs_quota_us: cfs_period_us * ncores as i64,
            parent_cfs_quota_us,
        }
    }

    /// Convert a cpuacct usage delta into a percentage
    ///
    /// `usage` is in nanoseconds and `duration` in microseconds. 100 means
    /// every core the engine may use was busy for the whole duration; when
    /// the parent cgroup caps the engine, the parent's quota is the 100%
    /// mark.
    pub fn convert_cpu_usage(&self, usage: i64, duration: i64) -> f64 {
        debug_assert!(duration > 0);
        debug_assert!(self.ncores > 0);

        // ns / 1000 -> us, * 100 -> percent
        let mut percent = usage as f64 / 10.0 / duration as f64 / self.ncores as f64;

        if self.parent_cfs_quota_us > 0 {
            percent *= self.system_cfs_quota_us as f64 / self.parent_cfs_quota_us as f64;
        }

        percent
    }
}

/// Effective memory ceiling in MB
///
/// `cg_ram` and `cg_memsw` are the enclosing cgroup's limits in bytes; pass
/// `u64::MAX` for `cg_memsw` when swap accounting is unavailable.
pub fn total_memory_mb(
    host_ram: u64,
    host_swap: u64,
    overcommit_ratio: u64,
    cg_ram: u64,
    cg_memsw: u64,
) -> u64 {
    let out_total = host_swap.saturating_add(host_ram.saturating_mul(overcommit_ratio) / 100);

    let ram = host_ram.min(cg_ram);
    let mut swap = host_swap;
    if cg_memsw < host_ram.saturating_add(host_swap) {
        swap = cg_memsw.saturating_sub(ram);
    }

    out_total.min(ram.saturating_add(swap)) / MB
}

pub fn overcommit_ratio_file(proc_root: &Path) -> PathBuf {
    proc_root.join("sys").join("vm").join("overcommit_ratio")
}

/// Read `vm.overcommit_ratio`
pub fn read_overcommit_ratio(proc_root: &Path) -> Result<u64> {
    let path = overcommit_ratio_file(proc_root);
    let value = std::fs::read_to_string(&path).map_err(|source| CgroupError::Read {
        path: path.clone(),
        source,
    })?;

    value.trim().parse().map_err(|_| CgroupError::Parse {
        path,
        value: value.trim().to_string(),
    })
}
