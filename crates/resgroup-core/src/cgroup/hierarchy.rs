//! Detection of the controller mount hierarchy from `/proc/1/cgroup`
//!
//! Format, one hierarchy per line:
//!
//! ```text
//! 10:cpuset:/
//! 4:cpu,cpuacct:/
//! 1:name=systemd:/init.scope
//! 0::/init.scope
//! ```

use nix::unistd::access;
use std::fs;
use std::path::{Path, PathBuf};

use super::error::{CgroupError, Result};
use super::layout::MountLayout;
use super::types::{Access, Controller};

/// One line of the membership descriptor, reduced to known controllers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEntry {
    pub controllers: Vec<Controller>,
    /// Path relative to the controller mount, `/` normalized to empty
    pub path: String,
}

/// Parse a `/proc/<pid>/cgroup` listing
///
/// Lines with an empty controller list are skipped, `name=value` tokens and
/// controllers the driver doesn't manage are dropped.
pub fn parse_membership(content: &str) -> Vec<MembershipEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim().splitn(3, ':');
            let _id = fields.next()?;
            let names = fields.next()?;
            let path = fields.next()?;

            if names.is_empty() {
                return None;
            }

            let controllers = names
                .split(',')
                .filter(|token| !token.contains('='))
                .filter_map(Controller::from_name)
                .collect();

            let path = if path == "/" { "" } else { path };

            Some(MembershipEntry {
                controllers,
                path: path.to_string(),
            })
        })
        .collect()
}

/// Path of init's membership descriptor under `proc_root`
pub fn membership_file(proc_root: &Path) -> PathBuf {
    proc_root.join("1").join("cgroup")
}

/// Build the mount layout from init's cgroup membership
///
/// Succeeds only when all four controllers are found exactly once and each
/// engine directory is accessible; anything else falls back to the default
/// component dir for every controller. Never logs and never fails: this
/// runs before logging is set up, and problems surface in the check phase.
pub fn detect_layout(mount_dir: &Path, proc_root: &Path) -> MountLayout {
    let mut layout = MountLayout::new(mount_dir);

    if detect_component_dirs(&mut layout, proc_root).is_none() {
        layout.reset_component_dirs();
    }
    layout
}

fn detect_component_dirs(layout: &mut MountLayout, proc_root: &Path) -> Option<()> {
    let content = fs::read_to_string(membership_file(proc_root)).ok()?;
    let mut detected = [false; 4];

    for entry in parse_membership(&content) {
        for controller in entry.controllers {
            layout.set_component_dir(controller, &entry.path);

            if access(&layout.engine_dir(controller), Access::RWX.flags()).is_err() {
                return None;
            }
            if detected[controller.index()] {
                return None;
            }
            detected[controller.index()] = true;
        }
    }

    detected.iter().all(|d| *d).then_some(())
}

/// Refuse a host where cpu and cpuset share one hierarchy
///
/// Moving a pid into the default cpuset group through `cgroup.procs` would
/// also move it out of its cpu group on such a hierarchy.
pub fn check_hierarchy(proc_root: &Path) -> Result<()> {
    let path = membership_file(proc_root);
    let content = fs::read_to_string(&path)
        .map_err(|source| CgroupError::HierarchyUnreadable { path, source })?;

    let comounted = parse_membership(&content).iter().any(|entry| {
        entry.controllers.contains(&Controller::Cpu)
            && entry.controllers.contains(&Controller::Cpuset)
    });

    if comounted {
        return Err(CgroupError::CoMounted);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::fixture::FakeCgroupFs;

    #[test]
    fn test_parse_membership() {
        let content = "\
10:cpuset:/
4:cpu,cpuacct:/docker/abc
3:memory:/docker/abc
1:name=systemd:/init.scope
0::/init.scope
";
        let entries = parse_membership(content);

        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].controllers, vec![Controller::Cpuset]);
        assert_eq!(entries[0].path, "");
        assert_eq!(entries[1].controllers, vec![Controller::Cpu, Controller::CpuAcct]);
        assert_eq!(entries[1].path, "/docker/abc");
        assert!(entries[3].controllers.is_empty());
    }

    #[test]
    fn test_detect_nested_layout() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path())
            .with_component_dir(Controller::Cpu, "/docker/abc")
            .with_component_dir(Controller::CpuAcct, "/docker/abc")
            .with_component_dir(Controller::Memory, "/docker/abc")
            .build()
            .unwrap();

        let layout = detect_layout(fs.mount_dir(), fs.proc_root());
        assert_eq!(&layout, fs.layout());
        assert_eq!(layout.component_dir(Controller::Cpu), "docker/abc");
        assert_eq!(layout.component_dir(Controller::Cpuset), "");
    }

    #[test]
    fn test_missing_controller_falls_back_for_all() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path())
            .with_component_dir(Controller::Cpu, "/docker/abc")
            .build()
            .unwrap();
        let membership = "4:cpu:/docker/abc\n5:cpuacct:/\n6:memory:/\n";
        fs.set(&membership_file(fs.proc_root()), membership).unwrap();

        let layout = detect_layout(fs.mount_dir(), fs.proc_root());
        for controller in Controller::ALL {
            assert_eq!(layout.component_dir(controller), "");
        }
    }

    #[test]
    fn test_duplicate_controller_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let membership = "1:cpu:/\n2:cpuacct:/\n3:memory:/\n4:cpuset:/\n5:cpu:/\n";
        fs.set(&membership_file(fs.proc_root()), membership).unwrap();

        let layout = detect_layout(fs.mount_dir(), fs.proc_root());
        assert_eq!(&layout, &MountLayout::new(fs.mount_dir()));
    }

    #[test]
    fn test_inaccessible_dir_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        let membership = "1:cpu:/nowhere\n2:cpuacct:/\n3:memory:/\n4:cpuset:/\n";
        fs.set(&membership_file(fs.proc_root()), membership).unwrap();

        let layout = detect_layout(fs.mount_dir(), fs.proc_root());
        assert_eq!(layout.component_dir(Controller::Cpu), "");
    }

    #[test]
    fn test_missing_descriptor_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let layout = detect_layout(Path::new("/sys/fs/cgroup"), dir.path());
        assert_eq!(layout, MountLayout::new("/sys/fs/cgroup"));
    }

    #[test]
    fn test_check_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
        assert!(check_hierarchy(fs.proc_root()).is_ok());

        let dir = tempfile::tempdir().unwrap();
        let fs = FakeCgroupFs::new(dir.path())
            .with_comounted_cpu_cpuset()
            .build()
            .unwrap();
        assert!(matches!(
            check_hierarchy(fs.proc_root()),
            Err(CgroupError::CoMounted)
        ));

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            check_hierarchy(empty.path()),
            Err(CgroupError::HierarchyUnreadable { .. })
        ));
    }
}
