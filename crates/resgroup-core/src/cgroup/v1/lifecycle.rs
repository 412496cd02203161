//! Group creation, process placement and removal

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::CgroupV1;
use crate::cgroup::error::{CgroupError, Result};
use crate::cgroup::lock::GroupLock;
use crate::cgroup::types::{Controller, GroupId, PROCS_FILE};
use crate::cgroup::utils::{
    parse_pids, process_exists, read_growing, read_str, write_cgroup_file, write_int,
};

/// Read size used when draining a `cgroup.procs` file
const PROCS_READ_CHUNK: usize = 512;

/// `rmdir` attempts while the kernel still reports the dir busy
const REMOVE_RETRIES: u32 = 10;

impl CgroupV1 {
    /// Controllers a group has a directory in, in removal order
    fn group_controllers(&self) -> Vec<Controller> {
        let mut controllers = vec![Controller::Cpu, Controller::CpuAcct];
        if self.cpuset_enabled() {
            controllers.push(Controller::Cpuset);
        }
        if self.memory_enabled() {
            controllers.push(Controller::Memory);
        }
        controllers
    }

    fn create_dir(&self, group: GroupId, controller: Controller) -> Result<()> {
        let path = self.group_file(group, controller, "")?;

        match fs::create_dir(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(source) => Err(CgroupError::Create { path, source }),
        }
    }

    /// Poll `check` until the kernel has populated the new dirs
    ///
    /// `check` runs silently up to the retry bound, then once more in
    /// report mode so the real error surfaces.
    fn wait_until_ready(
        &self,
        group: GroupId,
        check: impl Fn(&Self, GroupId, bool) -> Result<bool>,
    ) -> Result<()> {
        let interval = Duration::from_micros(self.config.create_retry_interval_us);

        for attempt in 1..=self.config.create_retries {
            if check(self, group, false)? {
                debug!(group = %group, attempt, "cgroup dirs ready");
                return Ok(());
            }
            thread::sleep(interval);
        }

        check(self, group, true)?;
        Ok(())
    }

    /// Copy `cpuset.mems` and `cpuset.cpus` from the engine root
    ///
    /// Sub-cgroups start with empty cpusets; mems goes first since the
    /// kernel refuses tasks in a cpuset without memory nodes.
    fn inherit_cpuset(&self, group: GroupId) -> Result<()> {
        for file in ["cpuset.mems", "cpuset.cpus"] {
            let value = read_str(&self.group_file(GroupId::ROOT, Controller::Cpuset, file)?)?;
            write_cgroup_file(&self.group_file(group, Controller::Cpuset, file)?, &value)?;
        }
        Ok(())
    }

    /// Create the group in every enabled controller
    pub fn create(&self, group: GroupId) -> Result<()> {
        for controller in self.group_controllers() {
            self.create_dir(group, controller)?;
        }

        self.wait_until_ready(group, Self::check_permission)?;

        if self.cpuset_enabled() {
            self.inherit_cpuset(group)?;
        }

        info!(group = %group, "created cgroup");
        Ok(())
    }

    /// Create the cpuset-only default group
    ///
    /// Processes that run without a cpuset of their own are parked here.
    pub(crate) fn create_default_cpuset_group(&self) -> Result<()> {
        self.create_dir(GroupId::DEFAULT, Controller::Cpuset)?;
        self.wait_until_ready(GroupId::DEFAULT, Self::check_cpuset_permission)?;
        self.inherit_cpuset(GroupId::DEFAULT)
    }

    /// Move `pid` into `group`
    ///
    /// Only the cpu and cpuacct hierarchies take the pid; memory is
    /// accounted at the engine level. With `cpuset_enabled` off the pid
    /// goes to the default cpuset group instead, so it always belongs to
    /// some cpuset.
    ///
    /// Worker processes remember their last placement and skip repeated
    /// writes for it. Nothing outside this process updates that memory.
    pub fn attach(&self, group: GroupId, pid: u32, cpuset_enabled: bool) -> Result<()> {
        let mut last = self
            .last_attached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !self.role.is_coordinator && *last == Some((pid, group)) {
            return Ok(());
        }

        let value = i64::from(pid);
        write_int(&self.group_file(group, Controller::Cpu, PROCS_FILE)?, value)?;
        write_int(&self.group_file(group, Controller::CpuAcct, PROCS_FILE)?, value)?;

        if self.cpuset_enabled() {
            let target = if cpuset_enabled { group } else { GroupId::DEFAULT };
            write_int(&self.group_file(target, Controller::Cpuset, PROCS_FILE)?, value)?;
        }

        *last = Some((pid, group));
        debug!(group = %group, pid, "attached process");
        Ok(())
    }

    /// Move every process of `group` to the default group
    ///
    /// The caller holds `lock` on the group's dir for the duration, so no
    /// process can be attached in between. The kernel takes one pid per
    /// write. A pid that can't be moved (usually because it exited) is
    /// logged and skipped.
    pub fn detach(&self, group: GroupId, controller: Controller, lock: &GroupLock) -> Result<()> {
        let src = self.group_file(group, controller, PROCS_FILE)?;
        let read_err = |source: io::Error| CgroupError::Read {
            path: src.clone(),
            source,
        };

        let mut file = File::open(&src).map_err(read_err)?;
        let content = read_growing(&mut file, PROCS_READ_CHUNK).map_err(read_err)?;
        drop(file);

        let pids = parse_pids(&src, &String::from_utf8_lossy(&content))?;
        if pids.is_empty() {
            return Ok(());
        }

        let dst = self.group_file(GroupId::DEFAULT, controller, PROCS_FILE)?;
        let write_err = |source: io::Error| CgroupError::Write {
            path: dst.clone(),
            source,
        };
        let mut file = OpenOptions::new().write(true).open(&dst).map_err(write_err)?;

        for pid in &pids {
            let line = format!("{}\n", pid);
            match file.write(line.as_bytes()) {
                Ok(n) if n == line.len() => {}
                Ok(n) => {
                    return Err(write_err(io::Error::new(
                        ErrorKind::WriteZero,
                        format!("short write of pid {}: {} of {} bytes", pid, n, line.len()),
                    )));
                }
                Err(e) => {
                    warn!(
                        pid,
                        exists = process_exists(*pid),
                        error = %e,
                        "failed to migrate pid to default cgroup"
                    );
                }
            }
        }

        debug!(
            group = %group,
            controller = %controller,
            count = pids.len(),
            lock = %lock.path().display(),
            "migrated processes"
        );
        Ok(())
    }

    /// Lock the group's directory in `controller`
    ///
    /// Returns `Ok(None)` when `block` is off and the lock is taken.
    pub fn lock(
        &self,
        group: GroupId,
        controller: Controller,
        block: bool,
    ) -> Result<Option<GroupLock>> {
        let dir = self.group_file(group, controller, "")?;
        GroupLock::acquire(&dir, block)
    }

    /// Remove the group from every enabled controller
    ///
    /// With `migrate` on, remaining processes go to the default group
    /// first. A group that is already gone counts as destroyed.
    pub fn destroy(&self, group: GroupId, migrate: bool) -> Result<()> {
        for controller in self.group_controllers() {
            self.remove_dir(group, controller, migrate)?;
        }

        info!(group = %group, "destroyed cgroup");
        Ok(())
    }

    fn remove_dir(&self, group: GroupId, controller: Controller, migrate: bool) -> Result<()> {
        let dir = self.group_file(group, controller, "")?;

        let lock = match GroupLock::wait(&dir) {
            Ok(lock) => lock,
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => return Ok(()),
            Err(e) => return Err(e),
        };

        if migrate {
            self.detach(group, controller, &lock)?;
        }

        // drop the limit so nothing lingers if the dir is reused
        let reset = match controller {
            Controller::Cpu => Some("cpu.shares"),
            Controller::Memory => Some("memory.limit_in_bytes"),
            _ => None,
        };
        if let Some(file) = reset {
            write_int(&self.group_file(group, controller, file)?, 0)?;
        }

        let interval = Duration::from_micros(self.config.create_retry_interval_us);
        let mut attempt = 0;
        loop {
            match (self.rmdir)(&dir) {
                Ok(()) => break,
                Err(e) if e.raw_os_error() == Some(libc::EBUSY) && attempt < REMOVE_RETRIES => {
                    attempt += 1;
                    thread::sleep(interval);
                }
                Err(source) => return Err(CgroupError::Remove { path: dir, source }),
            }
        }

        lock.unlock();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::fixture::FakeCgroupFs;
    use crate::cgroup::system::HostResources;
    use crate::process::ProcessRole;

    const HOST: HostResources = HostResources {
        ncores: 4,
        total_ram: 8 << 30,
        total_swap: 2 << 30,
    };

    fn driver(fs: &FakeCgroupFs) -> CgroupV1 {
        let mut cg = CgroupV1::new(fs.config()).with_host(HOST);
        assert!(cg.probe());
        cg
    }

    #[test]
    fn test_create_makes_dirs_and_inherits_cpuset() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        fs.set(&fs.engine_file(Controller::Cpuset, "cpuset.cpus"), "1-2")
            .unwrap();

        let group = GroupId(16384);
        fs.populate_group(group).unwrap();

        let cg = driver(&fs);
        cg.create(group).unwrap();

        for controller in Controller::ALL {
            assert!(fs.group_dir(group, controller).is_dir());
        }
        let cpus = fs.group_file(group, Controller::Cpuset, "cpuset.cpus");
        assert_eq!(fs.read(&cpus).unwrap(), "1-2");
    }

    #[test]
    fn test_create_waits_for_control_files() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let group = GroupId(16385);

        let mut config = fs.config();
        config.create_retries = 200;
        config.create_retry_interval_us = 1000;
        let mut cg = CgroupV1::new(config).with_host(HOST);
        assert!(cg.probe());

        // the "kernel" fills the dirs in while create is polling
        let kernel = {
            let fs = fs.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                fs.populate_group(group).unwrap();
            })
        };

        cg.create(group).unwrap();
        kernel.join().unwrap();

        let cpus = fs.group_file(group, Controller::Cpuset, "cpuset.cpus");
        assert_eq!(fs.read(&cpus).unwrap(), "0-3");
    }

    #[test]
    fn test_create_reports_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let cg = driver(&fs);

        // dirs get created but never populated
        let err = cg.create(GroupId(16386)).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("16386"));
    }

    #[test]
    fn test_create_fails_without_parent() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let cg = driver(&fs);

        std::fs::remove_dir_all(fs.layout().engine_dir(Controller::Cpu)).unwrap();

        let err = cg.create(GroupId(16387)).unwrap_err();
        assert!(matches!(err, CgroupError::Create { .. }));
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_attach_writes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let group = GroupId(16388);
        fs.populate_group(group).unwrap();
        fs.populate_group(GroupId::DEFAULT).unwrap();

        let cg = driver(&fs);
        cg.attach(group, 4242, false).unwrap();

        for controller in [Controller::Cpu, Controller::CpuAcct] {
            let procs = fs.group_file(group, controller, PROCS_FILE);
            assert_eq!(fs.read(&procs).unwrap(), "4242");
        }
        // no cpuset of its own: parked in the default cpuset group
        let procs = fs.group_file(group, Controller::Cpuset, PROCS_FILE);
        assert_eq!(fs.read(&procs).unwrap(), "");
        let procs = fs.group_file(GroupId::DEFAULT, Controller::Cpuset, PROCS_FILE);
        assert_eq!(fs.read(&procs).unwrap(), "4242");
        // attach leaves the memory hierarchy alone
        let procs = fs.group_file(group, Controller::Memory, PROCS_FILE);
        assert_eq!(fs.read(&procs).unwrap(), "");

        cg.attach(group, 4242, true).unwrap();
        let procs = fs.group_file(group, Controller::Cpuset, PROCS_FILE);
        assert_eq!(fs.read(&procs).unwrap(), "4242");
    }

    #[test]
    fn test_worker_attach_skips_repeated_writes() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let (g1, g2) = (GroupId(16389), GroupId(16390));
        for group in [g1, g2, GroupId::DEFAULT] {
            fs.populate_group(group).unwrap();
        }

        let mut cg = CgroupV1::new(fs.config())
            .with_host(HOST)
            .with_role(ProcessRole::worker());
        assert!(cg.probe());

        let pid = std::process::id();
        let procs = fs.group_file(g1, Controller::Cpu, PROCS_FILE);

        cg.attach(g1, pid, false).unwrap();
        assert_eq!(fs.read(&procs).unwrap(), pid.to_string());

        // wipe the file: a second attach to the same group must not write
        fs.set(&procs, "").unwrap();
        cg.attach(g1, pid, false).unwrap();
        assert_eq!(fs.read(&procs).unwrap(), "");

        // moving elsewhere and back writes again
        cg.attach(g2, pid, false).unwrap();
        cg.attach(g1, pid, false).unwrap();
        assert_eq!(fs.read(&procs).unwrap(), pid.to_string());
    }

    #[test]
    fn test_coordinator_attach_always_writes() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let group = GroupId(16391);
        fs.populate_group(group).unwrap();
        fs.populate_group(GroupId::DEFAULT).unwrap();

        let cg = driver(&fs);
        let procs = fs.group_file(group, Controller::Cpu, PROCS_FILE);

        cg.attach(group, 77, false).unwrap();
        fs.set(&procs, "").unwrap();
        cg.attach(group, 77, false).unwrap();
        assert_eq!(fs.read(&procs).unwrap(), "77");
    }

    #[test]
    fn test_detach_moves_every_pid() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let group = GroupId(16392);
        fs.populate_group(group).unwrap();
        fs.populate_group(GroupId::DEFAULT).unwrap();

        // enough pids to need several read chunks
        let pids: Vec<u32> = (100_000..100_300).collect();
        let listing: String = pids.iter().map(|p| format!("{}\n", p)).collect();
        assert!(listing.len() > PROCS_READ_CHUNK * 2);
        fs.set(&fs.group_file(group, Controller::Cpu, PROCS_FILE), &listing)
            .unwrap();

        let cg = driver(&fs);
        let lock = cg.lock(group, Controller::Cpu, true).unwrap().unwrap();
        cg.detach(group, Controller::Cpu, &lock).unwrap();
        lock.unlock();

        let moved = std::fs::read_to_string(fs.group_file(
            GroupId::DEFAULT,
            Controller::Cpu,
            PROCS_FILE,
        ))
        .unwrap();
        assert_eq!(moved, listing);
    }

    #[test]
    fn test_detach_empty_group() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let group = GroupId(16393);
        fs.populate_group(group).unwrap();

        // no default group needed when there is nothing to move
        let cg = driver(&fs);
        let lock = cg.lock(group, Controller::CpuAcct, true).unwrap().unwrap();
        cg.detach(group, Controller::CpuAcct, &lock).unwrap();
    }

    #[test]
    fn test_detach_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let group = GroupId(16394);
        fs.populate_group(group).unwrap();
        fs.populate_group(GroupId::DEFAULT).unwrap();
        fs.set(&fs.group_file(group, Controller::Cpu, PROCS_FILE), "12\nabc\n")
            .unwrap();

        let cg = driver(&fs);
        let lock = cg.lock(group, Controller::Cpu, true).unwrap().unwrap();
        let err = cg.detach(group, Controller::Cpu, &lock).unwrap_err();
        assert!(matches!(err, CgroupError::Parse { .. }));
    }

    #[test]
    fn test_lock_nonblocking() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let group = GroupId(16395);
        fs.populate_group(group).unwrap();

        let cg = driver(&fs);
        let held = cg.lock(group, Controller::Cpu, true).unwrap().unwrap();
        assert!(cg.lock(group, Controller::Cpu, false).unwrap().is_none());
        // other controllers are separate dirs
        assert!(cg.lock(group, Controller::Memory, false).unwrap().is_some());
        drop(held);
    }

    #[test]
    fn test_destroy_missing_group() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();

        let cg = driver(&fs);
        cg.destroy(GroupId(16396), true).unwrap();
    }

    #[test]
    fn test_destroy_migrates_before_remove() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let group = GroupId(16397);
        fs.populate_group(group).unwrap();
        fs.populate_group(GroupId::DEFAULT).unwrap();
        fs.set(&fs.group_file(group, Controller::Cpu, PROCS_FILE), "31\n32\n")
            .unwrap();

        let cg = driver(&fs);

        // a plain rmdir refuses a directory still holding control files
        let err = cg.destroy(group, true).unwrap_err();
        match &err {
            CgroupError::Remove { path, .. } => {
                assert_eq!(path, &fs.group_dir(group, Controller::Cpu));
            }
            other => panic!("unexpected error: {}", other),
        }

        let moved = fs.group_file(GroupId::DEFAULT, Controller::Cpu, PROCS_FILE);
        assert_eq!(std::fs::read_to_string(moved).unwrap(), "31\n32\n");
        let shares = fs.group_file(group, Controller::Cpu, "cpu.shares");
        assert_eq!(fs.read(&shares).unwrap(), "0");
    }

    #[test]
    fn test_create_then_destroy_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let group = GroupId(16398);
        fs.populate_group(group).unwrap();
        fs.populate_group(GroupId::DEFAULT).unwrap();

        let cg = driver(&fs).with_rmdir(FakeCgroupFs::rmdir);
        cg.create(group).unwrap();
        cg.attach(group, 4242, true).unwrap();

        cg.destroy(group, true).unwrap();

        for controller in Controller::ALL {
            assert!(!fs.group_dir(group, controller).exists(), "{}", controller);
        }
        for controller in [Controller::Cpu, Controller::CpuAcct, Controller::Cpuset] {
            let procs = fs.group_file(GroupId::DEFAULT, controller, PROCS_FILE);
            assert_eq!(std::fs::read_to_string(procs).unwrap(), "4242\n");
        }

        // the dir locks were released along the way
        fs.populate_group(group).unwrap();
        assert!(cg.lock(group, Controller::Cpu, false).unwrap().is_some());
    }

    #[test]
    fn test_destroy_retries_busy_dir() {
        use std::sync::atomic::{AtomicU32, Ordering};

        static CALLS: AtomicU32 = AtomicU32::new(0);
        fn busy_twice(dir: &std::path::Path) -> io::Result<()> {
            if CALLS.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(io::Error::from_raw_os_error(libc::EBUSY));
            }
            FakeCgroupFs::rmdir(dir)
        }

        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let group = GroupId(16399);
        fs.populate_group(group).unwrap();

        let cg = driver(&fs).with_rmdir(busy_twice);
        cg.destroy(group, false).unwrap();

        assert!(!fs.group_dir(group, Controller::Cpu).exists());
        // two busy replies on cpu, then one call per controller
        assert_eq!(CALLS.load(Ordering::SeqCst), 2 + Controller::ALL.len() as u32);
    }
}
