//! cgroup v1 backend
//!
//! One directory tree per controller, with the engine's groups nested under
//! `<controller>/<component dir>/gpdb`. The driver goes through three
//! phases before groups can be managed:
//!
//! 1. [`probe`](CgroupV1::probe): find the mount, detect the layout and
//!    check permissions silently. Any process may probe.
//! 2. [`check`](CgroupV1::check): fail loudly on anything missing and
//!    compute [`SystemInfo`]. Run by the coordinator, once per host.
//! 3. [`init`](CgroupV1::init): configure the engine root and create the
//!    reserved groups. Run by the coordinator, once per host.

mod controller;
mod lifecycle;
mod usage;

pub use controller::{memory_write_order, MEMORY_LIMIT_FILE, MEMSW_LIMIT_FILE};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing::{debug, info};

use super::error::{CgroupError, Result};
use super::hierarchy::{check_hierarchy, detect_layout};
use super::layout::{discover_mount_dir, MountLayout};
use super::lock::GroupLock;
use super::permission::Permissions;
use super::system::{HostResources, SystemInfo, DEFAULT_CPU_PERIOD_US};
use super::types::{BaseDir, Capabilities, CapabilitySnapshot, Controller, GroupId};
use super::utils::{read_int, read_str, write_cgroup_file, write_int};
use super::CgroupOps;
use crate::accounting::{ChunkAccounting, MemoryAccounting};
use crate::config::ResGroupConfig;
use crate::process::ProcessRole;

/// cgroup v1 driver state
///
/// The layout is written by [`probe`](Self::probe) and the system info by
/// [`check`](Self::check); both are read-only afterwards.
pub struct CgroupV1 {
    config: ResGroupConfig,
    layout: Option<MountLayout>,
    caps: Capabilities,
    perms: Permissions,
    role: ProcessRole,
    accounting: Box<dyn MemoryAccounting>,
    host: OnceLock<HostResources>,
    system: OnceLock<SystemInfo>,
    /// Last `(pid, group)` attached by this process
    last_attached: Mutex<Option<(u32, GroupId)>>,
    /// Removes a group dir; `rmdir` on cgroupfs drops the control files too
    rmdir: fn(&Path) -> io::Result<()>,
}

impl CgroupV1 {
    pub fn new(config: ResGroupConfig) -> Self {
        let caps = Capabilities::new(
            config.enable_cgroup_memory,
            config.enable_cgroup_memory && config.enable_cgroup_swap,
            config.enable_cgroup_cpuset,
        );
        let perms = Permissions::new(
            config.enable_cgroup_memory,
            config.enable_cgroup_swap,
            config.enable_cgroup_cpuset,
            config.memory_is_optional,
            config.cpuset_is_optional,
        );

        Self {
            config,
            layout: None,
            caps,
            perms,
            role: ProcessRole::coordinator(),
            accounting: Box::new(ChunkAccounting::default()),
            host: OnceLock::new(),
            system: OnceLock::new(),
            last_attached: Mutex::new(None),
            rmdir: remove_dir,
        }
    }

    /// Use fixed host resources instead of querying the host
    pub fn with_host(self, host: HostResources) -> Self {
        let _ = self.host.set(host);
        self
    }

    pub fn with_accounting(mut self, accounting: impl MemoryAccounting + 'static) -> Self {
        self.accounting = Box::new(accounting);
        self
    }

    pub fn with_role(mut self, role: ProcessRole) -> Self {
        self.role = role;
        self
    }

    /// Replace how group dirs are removed, for trees that are not cgroupfs
    pub fn with_rmdir(mut self, rmdir: fn(&Path) -> io::Result<()>) -> Self {
        self.rmdir = rmdir;
        self
    }

    /// Reuse system info computed by the coordinator's check phase
    pub fn with_system_info(self, info: SystemInfo) -> Self {
        let _ = self.system.set(info);
        self
    }

    pub fn config(&self) -> &ResGroupConfig {
        &self.config
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn layout(&self) -> Result<&MountLayout> {
        self.layout.as_ref().ok_or(CgroupError::MountNotFound)
    }

    pub fn capabilities(&self) -> CapabilitySnapshot {
        self.caps.snapshot()
    }

    pub fn system_info(&self) -> Result<SystemInfo> {
        self.system.get().copied().ok_or(CgroupError::NotChecked)
    }

    pub fn host(&self) -> Result<HostResources> {
        if let Some(host) = self.host.get() {
            return Ok(*host);
        }
        let host = HostResources::detect()?;
        Ok(*self.host.get_or_init(|| host))
    }

    pub(crate) fn memory_enabled(&self) -> bool {
        self.caps.memory()
    }

    pub(crate) fn swap_enabled(&self) -> bool {
        self.caps.swap()
    }

    pub(crate) fn cpuset_enabled(&self) -> bool {
        self.caps.cpuset()
    }

    pub(crate) fn path(
        &self,
        group: GroupId,
        base: BaseDir,
        controller: Controller,
        file: &str,
    ) -> Result<PathBuf> {
        self.layout()?.path(group, base, controller, file)
    }

    pub(crate) fn group_file(
        &self,
        group: GroupId,
        controller: Controller,
        file: &str,
    ) -> Result<PathBuf> {
        self.path(group, BaseDir::Engine, controller, file)
    }

    pub(crate) fn check_permission(&self, group: GroupId, report: bool) -> Result<bool> {
        self.perms.check(self.layout()?, &self.caps, group, report)
    }

    pub(crate) fn check_cpuset_permission(&self, group: GroupId, report: bool) -> Result<bool> {
        self.perms.check_cpuset(self.layout()?, &self.caps, group, report)
    }

    /// Locate the mount and detect the layout
    ///
    /// Returns whether the driver is usable. Never fails and never logs:
    /// problems are reported by [`check`](Self::check). A layout detected
    /// once is kept; later calls only repeat the permission check.
    pub fn probe(&mut self) -> bool {
        if self.layout.is_some() {
            return matches!(self.check_permission(GroupId::ROOT, false), Ok(true));
        }

        let mount_dir = match &self.config.mount_dir {
            Some(dir) => Some(dir.clone()),
            None => discover_mount_dir(&self.config.proc_root),
        };
        let Some(mount_dir) = mount_dir else {
            return false;
        };

        self.layout = Some(detect_layout(&mount_dir, &self.config.proc_root));

        matches!(self.check_permission(GroupId::ROOT, false), Ok(true))
    }

    /// Validate the host and compute system info
    pub fn check(&self) -> Result<()> {
        let layout = self.layout()?;

        self.check_permission(GroupId::ROOT, true)?;

        if !self.config.cpuset_is_optional {
            check_hierarchy(&self.config.proc_root)?;
        }

        for controller in Controller::ALL {
            info!(
                controller = %controller,
                dir = %layout.engine_dir(controller).display(),
                "gpdb dir for cgroup component"
            );
        }

        let host = self.host()?;
        let period = self.cfs_period_us()?;
        let parent_quota = read_int(&self.path(
            GroupId::ROOT,
            BaseDir::Parent,
            Controller::Cpu,
            "cpu.cfs_quota_us",
        )?)?;

        let info = SystemInfo::new(host.ncores, period, parent_quota);
        if let Err(info) = self.system.set(info) {
            debug!(?info, "cgroup system info already set, keeping it");
        } else {
            debug!(?info, "cgroup system info");
        }
        Ok(())
    }

    /// Configure the engine root and create the reserved groups
    pub fn init(&self) -> Result<()> {
        self.init_cpu()?;
        self.init_cpuset()?;

        self.create(GroupId::DEFAULT)?;
        self.create(GroupId::SYSTEM)?;
        self.attach(GroupId::SYSTEM, self.role.pid, false)?;

        info!(pid = self.role.pid, "cgroup initialized");
        Ok(())
    }

    fn init_cpu(&self) -> Result<()> {
        let info = self.system_info()?;

        // parent may report 0 on some old kernels, treat it as unlimited
        let base = if info.parent_cfs_quota_us <= 0 {
            info.system_cfs_quota_us
        } else {
            info.parent_cfs_quota_us
        };
        let quota = (base as f64 * self.config.cpu_limit) as i64;
        write_int(
            &self.group_file(GroupId::ROOT, Controller::Cpu, "cpu.cfs_quota_us")?,
            quota,
        )?;

        let parent_shares = read_int(&self.path(
            GroupId::ROOT,
            BaseDir::Parent,
            Controller::Cpu,
            "cpu.shares",
        )?)?;
        write_int(
            &self.group_file(GroupId::ROOT, Controller::Cpu, "cpu.shares")?,
            parent_shares * self.config.cpu_priority,
        )
    }

    fn init_cpuset(&self) -> Result<()> {
        if !self.cpuset_enabled() {
            return Ok(());
        }

        for file in ["cpuset.mems", "cpuset.cpus"] {
            let value = read_str(&self.path(
                GroupId::ROOT,
                BaseDir::Parent,
                Controller::Cpuset,
                file,
            )?)?;
            write_cgroup_file(
                &self.group_file(GroupId::ROOT, Controller::Cpuset, file)?,
                &value,
            )?;
        }

        self.create_default_cpuset_group()
    }

    /// `cpu.cfs_period_us` of the engine root, repaired when the kernel
    /// reports 0
    pub(crate) fn cfs_period_us(&self) -> Result<i64> {
        let path = self.group_file(GroupId::ROOT, Controller::Cpu, "cpu.cfs_period_us")?;

        let mut period = read_int(&path)?;
        if period == 0 {
            write_int(&path, DEFAULT_CPU_PERIOD_US)?;
            period = read_int(&path)?;
        }
        if period <= 0 {
            return Err(CgroupError::InvalidPeriod(period));
        }
        Ok(period)
    }
}

fn remove_dir(dir: &Path) -> io::Result<()> {
    std::fs::remove_dir(dir)
}

impl CgroupOps for CgroupV1 {
    fn name(&self) -> &'static str {
        "cgroup"
    }

    fn probe(&mut self) -> bool {
        CgroupV1::probe(self)
    }

    fn check(&self) -> Result<()> {
        CgroupV1::check(self)
    }

    fn init(&self) -> Result<()> {
        CgroupV1::init(self)
    }

    fn capabilities(&self) -> CapabilitySnapshot {
        CgroupV1::capabilities(self)
    }

    fn create(&self, group: GroupId) -> Result<()> {
        CgroupV1::create(self, group)
    }

    fn attach(&self, group: GroupId, pid: u32, cpuset_enabled: bool) -> Result<()> {
        CgroupV1::attach(self, group, pid, cpuset_enabled)
    }

    fn detach(&self, group: GroupId, controller: Controller, lock: &GroupLock) -> Result<()> {
        CgroupV1::detach(self, group, controller, lock)
    }

    fn destroy(&self, group: GroupId, migrate: bool) -> Result<()> {
        CgroupV1::destroy(self, group, migrate)
    }

    fn lock(&self, group: GroupId, controller: Controller, block: bool) -> Result<Option<GroupLock>> {
        CgroupV1::lock(self, group, controller, block)
    }

    fn set_cpu_limit(&self, group: GroupId, percent: i32) -> Result<()> {
        CgroupV1::set_cpu_limit(self, group, percent)
    }

    fn set_memory_limit(&self, group: GroupId, percent: i32) -> Result<()> {
        CgroupV1::set_memory_limit(self, group, percent)
    }

    fn set_memory_limit_by_chunks(&self, group: GroupId, chunks: i32) -> Result<()> {
        CgroupV1::set_memory_limit_by_chunks(self, group, chunks)
    }

    fn get_cpu_usage(&self, group: GroupId) -> Result<i64> {
        CgroupV1::get_cpu_usage(self, group)
    }

    fn get_memory_usage(&self, group: GroupId) -> Result<i32> {
        CgroupV1::get_memory_usage(self, group)
    }

    fn get_memory_limit_chunks(&self, group: GroupId) -> Result<i32> {
        CgroupV1::get_memory_limit_chunks(self, group)
    }

    fn get_total_memory(&self) -> Result<u64> {
        CgroupV1::get_total_memory(self)
    }

    fn get_cpuset(&self, group: GroupId) -> Result<Option<String>> {
        CgroupV1::get_cpuset(self, group)
    }

    fn set_cpuset(&self, group: GroupId, cpuset: &str) -> Result<()> {
        CgroupV1::set_cpuset(self, group, cpuset)
    }

    fn convert_cpu_usage(&self, usage: i64, duration: i64) -> Result<f64> {
        Ok(self.system_info()?.convert_cpu_usage(usage, duration))
    }
}
