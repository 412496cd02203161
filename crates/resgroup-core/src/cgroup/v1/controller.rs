//! CPU, memory and cpuset limits

use tracing::debug;

use super::CgroupV1;
use crate::cgroup::error::{CgroupError, Result};
use crate::cgroup::lock::GroupLock;
use crate::cgroup::types::{Controller, GroupId};
use crate::cgroup::utils::{read_int, read_str, write_cgroup_file, write_int};

pub const MEMORY_LIMIT_FILE: &str = "memory.limit_in_bytes";
pub const MEMSW_LIMIT_FILE: &str = "memory.memsw.limit_in_bytes";

/// Order in which the memory and mem+swap limits must be written
///
/// The kernel rejects a memory limit above the mem+swap limit, so raising
/// writes mem+swap first and lowering writes memory first. An unchanged
/// limit needs no write at all.
pub fn memory_write_order(new: i64, old: i64) -> &'static [&'static str] {
    if new > old {
        &[MEMSW_LIMIT_FILE, MEMORY_LIMIT_FILE]
    } else if new < old {
        &[MEMORY_LIMIT_FILE, MEMSW_LIMIT_FILE]
    } else {
        &[]
    }
}

/// `vmem × percent / 100 × primaries`, saturating at `i32::MAX`
fn memory_limit_chunks(vmem_limit_chunks: i32, percent: i32, primaries: i32) -> i32 {
    let chunks = i64::from(vmem_limit_chunks) * i64::from(percent) / 100;
    let chunks = chunks.saturating_mul(i64::from(primaries));
    i32::try_from(chunks.max(0)).unwrap_or(i32::MAX)
}

fn check_percent(percent: i32) -> Result<()> {
    if !(0..=100).contains(&percent) {
        return Err(CgroupError::InvalidLimit(format!(
            "percentage must be within [0, 100], got {}",
            percent
        )));
    }
    Ok(())
}

impl CgroupV1 {
    /// Set the group's CPU share, `percent` in `[0, 100]`
    ///
    /// `cpu.shares` is always a fraction of the engine root's shares. The
    /// hard quota is only set with ceiling enforcement on, otherwise it is
    /// reset to unlimited.
    pub fn set_cpu_limit(&self, group: GroupId, percent: i32) -> Result<()> {
        check_percent(percent)?;
        let percent = i64::from(percent);

        // everything fallible is read before the first write, so a failure
        // leaves both files untouched
        let root_shares =
            read_int(&self.group_file(GroupId::ROOT, Controller::Cpu, "cpu.shares")?)?;
        let quota = if self.config.cpu_ceiling_enforcement {
            let ncores = i64::from(self.system_info()?.ncores);
            let period = self.cfs_period_us()?;
            period * ncores * percent / 100
        } else {
            -1
        };
        let shares_file = self.group_file(group, Controller::Cpu, "cpu.shares")?;
        let quota_file = self.group_file(group, Controller::Cpu, "cpu.cfs_quota_us")?;

        write_int(&shares_file, root_shares * percent / 100)?;
        write_int(&quota_file, quota)?;

        debug!(group = %group, percent, quota, "set cpu limit");
        Ok(())
    }

    /// Set the group's memory limit as a share of the host's vmem budget
    ///
    /// Runs under the group's memory dir lock.
    pub fn set_memory_limit(&self, group: GroupId, percent: i32) -> Result<()> {
        check_percent(percent)?;
        if !self.memory_enabled() {
            return Ok(());
        }

        let chunks = memory_limit_chunks(
            self.accounting.vmem_limit_chunks(),
            percent,
            self.accounting.host_primary_count(),
        );

        let lock = GroupLock::wait(&self.group_file(group, Controller::Memory, "")?)?;
        self.set_memory_limit_by_chunks(group, chunks)?;
        lock.unlock();
        Ok(())
    }

    /// Set the group's memory limit in chunks
    ///
    /// With swap accounting on, mem+swap gets the same limit and the two
    /// writes are ordered by [`memory_write_order`].
    pub fn set_memory_limit_by_chunks(&self, group: GroupId, chunks: i32) -> Result<()> {
        if !self.memory_enabled() {
            return Ok(());
        }

        let bytes = self.accounting.chunks_to_bytes(chunks);
        let limit = self.group_file(group, Controller::Memory, MEMORY_LIMIT_FILE)?;

        if !self.swap_enabled() {
            return write_int(&limit, bytes);
        }

        let old = read_int(&limit)?;
        for file in memory_write_order(bytes, old) {
            write_int(&self.group_file(group, Controller::Memory, file)?, bytes)?;
        }

        debug!(group = %group, bytes, old, "set memory limit");
        Ok(())
    }

    /// The group's `cpuset.cpus`, `None` without cpuset support
    pub fn get_cpuset(&self, group: GroupId) -> Result<Option<String>> {
        if !self.cpuset_enabled() {
            return Ok(None);
        }
        read_str(&self.group_file(group, Controller::Cpuset, "cpuset.cpus")?).map(Some)
    }

    /// Pin the group to `cpuset`, e.g. `0,2-3`
    pub fn set_cpuset(&self, group: GroupId, cpuset: &str) -> Result<()> {
        if !self.cpuset_enabled() {
            return Ok(());
        }
        write_cgroup_file(&self.group_file(group, Controller::Cpuset, "cpuset.cpus")?, cpuset)
    }
}
