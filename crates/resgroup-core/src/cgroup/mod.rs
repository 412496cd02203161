//! Cgroup v1 resource group driver
//!
//! Manages per-group CPU, memory and cpuset limits for the engine by
//! reading and writing the cgroup v1 filesystem.
//!
//! # Lifecycle
//! - `probe` on every process, `check` and `init` once on the coordinator
//! - Groups are created, populated with `attach`, and destroyed after
//!   their processes are migrated to the default group
//! - Destroy-with-migration holds the group's dir lock throughout

pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod fixture;
pub mod hierarchy;
pub mod layout;
pub mod lock;
pub mod permission;
pub mod system;
pub mod types;
mod utils;
pub mod v1;

pub use error::{CgroupError, Result};
pub use layout::{MountLayout, MAX_PATH_LEN};
pub use lock::GroupLock;
pub use system::{HostResources, SystemInfo};
pub use types::{BaseDir, Capability, CapabilitySnapshot, Controller, GroupId};
pub use v1::CgroupV1;

/// Operations a resource group backend provides
///
/// Selected once at startup. Every method except `probe` expects a
/// successful `probe` first; usage conversion and CPU quotas also need
/// `check`.
pub trait CgroupOps: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Detect the backend silently, returning whether it is usable
    fn probe(&mut self) -> bool;

    /// Fail on unmet requirements and gather system info
    fn check(&self) -> Result<()>;

    /// Configure the engine root and the reserved groups
    fn init(&self) -> Result<()>;

    fn capabilities(&self) -> CapabilitySnapshot;

    fn create(&self, group: GroupId) -> Result<()>;

    fn attach(&self, group: GroupId, pid: u32, cpuset_enabled: bool) -> Result<()>;

    /// Migrate the group's processes to the default group, under `lock`
    fn detach(&self, group: GroupId, controller: Controller, lock: &GroupLock) -> Result<()>;

    fn destroy(&self, group: GroupId, migrate: bool) -> Result<()>;

    /// `Ok(None)` means the lock is held elsewhere and `block` was off
    fn lock(&self, group: GroupId, controller: Controller, block: bool)
        -> Result<Option<GroupLock>>;

    /// `percent` in `[0, 100]`
    fn set_cpu_limit(&self, group: GroupId, percent: i32) -> Result<()>;

    /// `percent` in `[0, 100]`
    fn set_memory_limit(&self, group: GroupId, percent: i32) -> Result<()>;

    fn set_memory_limit_by_chunks(&self, group: GroupId, chunks: i32) -> Result<()>;

    /// Cumulative CPU time in nanoseconds
    fn get_cpu_usage(&self, group: GroupId) -> Result<i64>;

    /// Chunks
    fn get_memory_usage(&self, group: GroupId) -> Result<i32>;

    fn get_memory_limit_chunks(&self, group: GroupId) -> Result<i32>;

    /// Effective memory ceiling in MB
    fn get_total_memory(&self) -> Result<u64>;

    /// `None` when cpuset support is off
    fn get_cpuset(&self, group: GroupId) -> Result<Option<String>>;

    fn set_cpuset(&self, group: GroupId, cpuset: &str) -> Result<()>;

    /// Percentage of the engine's CPU allotment used over `duration`
    /// microseconds, given `usage` nanoseconds of CPU time
    fn convert_cpu_usage(&self, usage: i64, duration: i64) -> Result<f64>;
}
