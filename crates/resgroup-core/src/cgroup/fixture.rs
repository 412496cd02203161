//! Fake cgroup v1 tree for tests
//!
//! Lays out controller directories, the engine subtree, control files and
//! the procfs entries the driver reads, all under a caller-provided
//! directory. A regular filesystem does not materialize control files on
//! `mkdir`, so tests call [`FakeCgroupFs::populate_group`] to play the
//! kernel's part for new groups.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::layout::MountLayout;
use super::types::{Controller, GroupId, ENGINE_DIR, PROCS_FILE};
use crate::config::ResGroupConfig;

/// Builder for [`FakeCgroupFs`]
#[derive(Debug, Clone)]
pub struct FakeCgroupFsBuilder {
    root: PathBuf,
    controllers: Vec<Controller>,
    component_dirs: Vec<(Controller, String)>,
    swap: bool,
    comount_cpu_cpuset: bool,
    parent_quota: i64,
    period: i64,
    cpus: String,
    parent_memory_limit: u64,
    parent_memsw_limit: u64,
    overcommit_ratio: u32,
}

impl FakeCgroupFsBuilder {
    pub fn without_controller(mut self, controller: Controller) -> Self {
        self.controllers.retain(|c| *c != controller);
        self
    }

    /// No `memory.memsw.*` files
    pub fn without_swap(mut self) -> Self {
        self.swap = false;
        self
    }

    /// Nest the controller's engine subtree like a container would
    pub fn with_component_dir(mut self, controller: Controller, dir: &str) -> Self {
        self.component_dirs.push((controller, dir.to_string()));
        self
    }

    /// List cpu and cpuset on one line of `/proc/1/cgroup`
    pub fn with_comounted_cpu_cpuset(mut self) -> Self {
        self.comount_cpu_cpuset = true;
        self
    }

    pub fn with_parent_quota(mut self, quota: i64) -> Self {
        self.parent_quota = quota;
        self
    }

    pub fn with_period(mut self, period: i64) -> Self {
        self.period = period;
        self
    }

    pub fn with_cpus(mut self, cpus: &str) -> Self {
        self.cpus = cpus.to_string();
        self
    }

    pub fn with_parent_memory(mut self, limit: u64, memsw_limit: u64) -> Self {
        self.parent_memory_limit = limit;
        self.parent_memsw_limit = memsw_limit;
        self
    }

    pub fn with_overcommit_ratio(mut self, ratio: u32) -> Self {
        self.overcommit_ratio = ratio;
        self
    }

    pub fn build(self) -> io::Result<FakeCgroupFs> {
        let mount_dir = self.root.join("cgroup");
        let proc_root = self.root.join("proc");

        let mut layout = MountLayout::new(&mount_dir);
        for (controller, dir) in &self.component_dirs {
            layout.set_component_dir(*controller, dir);
        }

        let fs = FakeCgroupFs {
            mount_dir,
            proc_root,
            layout,
            controllers: self.controllers.clone(),
            swap: self.swap,
            period: self.period,
            cpus: self.cpus.clone(),
        };

        for controller in &self.controllers {
            let parent = fs.layout.parent_dir(*controller);
            fs.write_controller_files(&parent, *controller)?;
            fs.write_controller_files(&parent.join(ENGINE_DIR), *controller)?;
        }

        if self.controllers.contains(&Controller::Cpu) {
            fs.set(&fs.parent_file(Controller::Cpu, "cpu.cfs_quota_us"), &self.parent_quota.to_string())?;
        }
        if self.controllers.contains(&Controller::Memory) {
            let limit = self.parent_memory_limit.to_string();
            fs.set(&fs.parent_file(Controller::Memory, "memory.limit_in_bytes"), &limit)?;
            if self.swap {
                let memsw = self.parent_memsw_limit.to_string();
                fs.set(&fs.parent_file(Controller::Memory, "memory.memsw.limit_in_bytes"), &memsw)?;
            }
        }

        self.write_proc(&fs)?;
        Ok(fs)
    }

    fn write_proc(&self, fs: &FakeCgroupFs) -> io::Result<()> {
        let mut membership = String::new();
        let mut mounts = String::from("sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0\n");
        let mut id = 12;

        let mut line = |names: &str, controller: Controller| {
            let component = format!("/{}", fs.layout.component_dir(controller));
            membership.push_str(&format!("{}:{}:{}\n", id, names, component));
            mounts.push_str(&format!(
                "cgroup {} cgroup rw,nosuid,nodev,noexec,relatime,{} 0 0\n",
                fs.mount_dir.join(names).display(),
                names
            ));
            id -= 1;
        };

        for controller in &self.controllers {
            let comounted = self.comount_cpu_cpuset
                && matches!(controller, Controller::Cpu | Controller::Cpuset);
            if !comounted {
                line(controller.name(), *controller);
            }
        }
        if self.comount_cpu_cpuset {
            line("cpu,cpuset", Controller::Cpu);
        }

        membership.push_str("1:name=systemd:/init.scope\n0::/init.scope\n");

        fs::create_dir_all(fs.proc_root.join("1"))?;
        fs::create_dir_all(fs.proc_root.join("self"))?;
        fs::create_dir_all(fs.proc_root.join("sys").join("vm"))?;
        fs::write(fs.proc_root.join("1").join("cgroup"), membership)?;
        fs::write(fs.proc_root.join("self").join("mounts"), mounts)?;
        fs::write(
            fs.proc_root.join("sys").join("vm").join("overcommit_ratio"),
            format!("{}\n", self.overcommit_ratio),
        )?;
        Ok(())
    }
}

/// A fake cgroup v1 tree on a regular filesystem
#[derive(Debug, Clone)]
pub struct FakeCgroupFs {
    mount_dir: PathBuf,
    proc_root: PathBuf,
    layout: MountLayout,
    controllers: Vec<Controller>,
    swap: bool,
    period: i64,
    cpus: String,
}

impl FakeCgroupFs {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(root: &Path) -> FakeCgroupFsBuilder {
        FakeCgroupFsBuilder {
            root: root.to_path_buf(),
            controllers: Controller::ALL.to_vec(),
            component_dirs: Vec::new(),
            swap: true,
            comount_cpu_cpuset: false,
            parent_quota: -1,
            period: 100_000,
            cpus: "0-3".to_string(),
            parent_memory_limit: 9223372036854771712,
            parent_memsw_limit: 9223372036854771712,
            overcommit_ratio: 50,
        }
    }

    pub fn mount_dir(&self) -> &Path {
        &self.mount_dir
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    /// Layout the detector is expected to produce for this tree
    pub fn layout(&self) -> &MountLayout {
        &self.layout
    }

    /// Driver configuration pointed at this tree
    pub fn config(&self) -> ResGroupConfig {
        ResGroupConfig {
            mount_dir: Some(self.mount_dir.clone()),
            proc_root: self.proc_root.clone(),
            create_retries: 3,
            create_retry_interval_us: 100,
            ..ResGroupConfig::default()
        }
    }

    pub fn engine_file(&self, controller: Controller, file: &str) -> PathBuf {
        self.layout.engine_dir(controller).join(file)
    }

    pub fn parent_file(&self, controller: Controller, file: &str) -> PathBuf {
        self.layout.parent_dir(controller).join(file)
    }

    pub fn group_dir(&self, group: GroupId, controller: Controller) -> PathBuf {
        self.group_file(group, controller, "")
    }

    pub fn group_file(&self, group: GroupId, controller: Controller, file: &str) -> PathBuf {
        let mut path = self.layout.engine_dir(controller);
        if !group.is_root() {
            path.push(group.dir_name());
        }
        if !file.is_empty() {
            path.push(file);
        }
        path
    }

    /// Create the group's directories and control files, as the kernel does
    /// after `mkdir`
    pub fn populate_group(&self, group: GroupId) -> io::Result<()> {
        for controller in &self.controllers {
            let dir = self.group_dir(group, *controller);
            self.write_controller_files(&dir, *controller)?;
        }
        Ok(())
    }

    /// `rmdir` with cgroupfs semantics: the control files go with the
    /// dir, child dirs still block removal
    ///
    /// Pass it to [`CgroupV1::with_rmdir`](crate::cgroup::CgroupV1::with_rmdir).
    pub fn rmdir(dir: &Path) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
            }
        }
        fs::remove_dir(dir)
    }

    pub fn set(&self, path: &Path, value: &str) -> io::Result<()> {
        fs::write(path, value)
    }

    pub fn read(&self, path: &Path) -> io::Result<String> {
        Ok(fs::read_to_string(path)?.trim().to_string())
    }

    fn write_controller_files(&self, dir: &Path, controller: Controller) -> io::Result<()> {
        fs::create_dir_all(dir)?;

        let files: Vec<(&str, String)> = match controller {
            Controller::Cpu => vec![
                (PROCS_FILE, String::new()),
                ("cpu.cfs_period_us", self.period.to_string()),
                ("cpu.cfs_quota_us", "-1".to_string()),
                ("cpu.shares", "1024".to_string()),
            ],
            Controller::CpuAcct => vec![
                (PROCS_FILE, String::new()),
                ("cpuacct.usage", "0".to_string()),
                ("cpuacct.stat", "user 0\nsystem 0\n".to_string()),
            ],
            Controller::Memory => {
                let mut files = vec![
                    (PROCS_FILE, String::new()),
                    ("memory.limit_in_bytes", "9223372036854771712".to_string()),
                    ("memory.usage_in_bytes", "0".to_string()),
                ];
                if self.swap {
                    files.push(("memory.memsw.limit_in_bytes", "9223372036854771712".to_string()));
                    files.push(("memory.memsw.usage_in_bytes", "0".to_string()));
                }
                files
            }
            Controller::Cpuset => vec![
                (PROCS_FILE, String::new()),
                ("cpuset.cpus", self.cpus.clone()),
                ("cpuset.mems", "0".to_string()),
            ],
        };

        for (name, value) in files {
            fs::write(dir.join(name), value)?;
        }
        Ok(())
    }
}
