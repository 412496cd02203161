//! Usage counters and the effective memory ceiling

use tracing::debug;

use super::controller::{MEMORY_LIMIT_FILE, MEMSW_LIMIT_FILE};
use super::CgroupV1;
use crate::cgroup::error::Result;
use crate::cgroup::system::{read_overcommit_ratio, total_memory_mb};
use crate::cgroup::types::{BaseDir, Controller, GroupId};
use crate::cgroup::utils::{read_int, read_uint};

impl CgroupV1 {
    /// Cumulative CPU time of the group in nanoseconds
    pub fn get_cpu_usage(&self, group: GroupId) -> Result<i64> {
        read_int(&self.group_file(group, Controller::CpuAcct, "cpuacct.usage")?)
    }

    /// Memory in use by the group, in chunks
    ///
    /// Includes swap when swap accounting is on. Reports 0 without memory
    /// accounting.
    pub fn get_memory_usage(&self, group: GroupId) -> Result<i32> {
        if !self.memory_enabled() {
            return Ok(0);
        }

        let file = if self.swap_enabled() {
            "memory.memsw.usage_in_bytes"
        } else {
            "memory.usage_in_bytes"
        };
        let bytes = read_int(&self.group_file(group, Controller::Memory, file)?)?;
        Ok(self.accounting.bytes_to_chunks(bytes))
    }

    /// The group's memory limit in chunks, `i32::MAX` without memory
    /// accounting
    pub fn get_memory_limit_chunks(&self, group: GroupId) -> Result<i32> {
        if !self.memory_enabled() {
            return Ok(i32::MAX);
        }

        let limit = self.group_file(group, Controller::Memory, MEMORY_LIMIT_FILE)?;
        let bytes = i64::try_from(read_uint(&limit)?).unwrap_or(i64::MAX);
        Ok(self.accounting.bytes_to_chunks(bytes))
    }

    /// Memory the engine should plan against, in MB
    ///
    /// The host's RAM and swap, capped by the enclosing cgroup and by the
    /// overcommit ratio.
    pub fn get_total_memory(&self) -> Result<u64> {
        let host = self.host()?;
        let ratio = read_overcommit_ratio(&self.config.proc_root)?;

        let (cg_ram, cg_memsw) = if self.memory_enabled() {
            let parent =
                |file: &str| self.path(GroupId::ROOT, BaseDir::Parent, Controller::Memory, file);

            let ram = read_uint(&parent(MEMORY_LIMIT_FILE)?)?;
            let memsw = if self.swap_enabled() {
                read_uint(&parent(MEMSW_LIMIT_FILE)?)?
            } else {
                debug!("swap memory is unlimited");
                u64::MAX
            };
            (ram, memsw)
        } else {
            (u64::MAX, u64::MAX)
        };

        Ok(total_memory_mb(
            host.total_ram,
            host.total_swap,
            ratio,
            cg_ram,
            cg_memsw,
        ))
    }
}
