//! Mount layout and path resolution
//!
//! Every controller is mounted on its own directory under a common base:
//!
//! ```text
//! /sys/fs/cgroup/                  <- mount dir
//! ├── cpu/<component dir>/         <- parent base (host or container limits)
//! │   └── gpdb/                    <- engine base, group ROOT
//! │       ├── defaultgroup/        <- GroupId::DEFAULT
//! │       ├── system/              <- GroupId::SYSTEM
//! │       └── 16384/               <- caller assigned group
//! ├── cpuacct/...
//! ├── memory/...
//! └── cpuset/...
//! ```

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::error::{CgroupError, Result};
use super::types::{BaseDir, Controller, GroupId, ENGINE_DIR};

/// Longest path the resolver hands out
pub const MAX_PATH_LEN: usize = 4096;

/// Component dir used for every controller when detection fails
pub const FALLBACK_COMPONENT_DIR: &str = "";

/// Where each controller's engine subtree lives
///
/// Built once during detection and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountLayout {
    mount_dir: PathBuf,
    component_dirs: [String; 4],
}

impl MountLayout {
    /// Layout with the fallback component dir for every controller
    pub fn new(mount_dir: impl Into<PathBuf>) -> Self {
        Self {
            mount_dir: mount_dir.into(),
            component_dirs: Default::default(),
        }
    }

    pub fn with_component_dir(mut self, controller: Controller, dir: &str) -> Self {
        self.set_component_dir(controller, dir);
        self
    }

    /// Component dirs are stored relative; `/` and empty both mean the
    /// controller's mount point itself.
    pub(crate) fn set_component_dir(&mut self, controller: Controller, dir: &str) {
        self.component_dirs[controller.index()] = dir.trim_matches('/').to_string();
    }

    pub(crate) fn reset_component_dirs(&mut self) {
        for controller in Controller::ALL {
            self.set_component_dir(controller, FALLBACK_COMPONENT_DIR);
        }
    }

    pub fn mount_dir(&self) -> &Path {
        &self.mount_dir
    }

    pub fn component_dir(&self, controller: Controller) -> &str {
        &self.component_dirs[controller.index()]
    }

    /// `<mount>/<controller>/<component dir>`
    pub fn parent_dir(&self, controller: Controller) -> PathBuf {
        let mut dir = self.mount_dir.join(controller.name());
        let component = self.component_dir(controller);
        if !component.is_empty() {
            dir.push(component);
        }
        dir
    }

    /// `<mount>/<controller>/<component dir>/gpdb`
    pub fn engine_dir(&self, controller: Controller) -> PathBuf {
        self.parent_dir(controller).join(ENGINE_DIR)
    }

    /// Resolve a group's directory (`file` empty) or control file
    ///
    /// The parent base has no groups beneath it, so `group` only matters
    /// for [`BaseDir::Engine`].
    pub fn path(
        &self,
        group: GroupId,
        base: BaseDir,
        controller: Controller,
        file: &str,
    ) -> Result<PathBuf> {
        let mut path = match base {
            BaseDir::Parent => self.parent_dir(controller),
            BaseDir::Engine => {
                let mut dir = self.engine_dir(controller);
                if !group.is_root() {
                    dir.push(group.dir_name());
                }
                dir
            }
        };

        if !file.is_empty() {
            path.push(file);
        }

        if path.as_os_str().len() >= MAX_PATH_LEN {
            return Err(CgroupError::PathTooLong {
                path,
                max: MAX_PATH_LEN,
            });
        }

        Ok(path)
    }
}

/// Find the cgroup v1 mount base in a `/proc/self/mounts` listing
///
/// The first `cgroup` typed mount wins; the base is its parent
/// (`/sys/fs/cgroup/cpu` gives `/sys/fs/cgroup`).
pub fn parse_mount_dir(mounts: &str) -> Option<PathBuf> {
    mounts.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let _device = fields.next()?;
        let mount_point = fields.next()?;
        let fs_type = fields.next()?;

        if fs_type != "cgroup" {
            return None;
        }
        Path::new(mount_point).parent().map(Path::to_path_buf)
    })
}

/// Discover the mount base from `<proc_root>/self/mounts`
pub fn discover_mount_dir(proc_root: &Path) -> Option<PathBuf> {
    let mounts = fs::read_to_string(proc_root.join("self").join("mounts")).ok()?;
    parse_mount_dir(&mounts)
}
