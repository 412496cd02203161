//! Data types for cgroup management

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use super::error::CgroupError;

/// Name of the engine's own subtree under each controller
pub const ENGINE_DIR: &str = "gpdb";

/// Directory name of the default group
pub const DEFAULT_GROUP_DIR: &str = "defaultgroup";

/// Directory name of the system group
pub const SYSTEM_GROUP_DIR: &str = "system";

/// Process list file present in every controller directory
pub const PROCS_FILE: &str = "cgroup.procs";

/// cgroup v1 controller managed by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Controller {
    Cpu,
    #[serde(rename = "cpuacct")]
    CpuAcct,
    Memory,
    Cpuset,
}

impl Controller {
    /// All controllers, in detection order
    pub const ALL: [Controller; 4] = [
        Controller::Cpu,
        Controller::CpuAcct,
        Controller::Memory,
        Controller::Cpuset,
    ];

    /// Kernel name, also the mount directory name
    pub fn name(self) -> &'static str {
        match self {
            Controller::Cpu => "cpu",
            Controller::CpuAcct => "cpuacct",
            Controller::Memory => "memory",
            Controller::Cpuset => "cpuset",
        }
    }

    /// Look up a controller by its kernel name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Controller {
    type Err = CgroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
            .ok_or_else(|| CgroupError::InvalidLimit(format!("unknown cgroup controller '{}'", s)))
    }
}

/// Resource group handle
///
/// Handles 0, 1 and 2 are reserved: the engine root, the default group
/// and the system group. Everything else is caller assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u32);

impl GroupId {
    /// The engine's own subtree root
    pub const ROOT: GroupId = GroupId(0);

    /// Migration target and fallback cpuset group
    pub const DEFAULT: GroupId = GroupId(1);

    /// Group of the coordinator and its auxiliary processes
    pub const SYSTEM: GroupId = GroupId(2);

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }

    /// Directory name relative to the engine subtree (empty for the root)
    pub fn dir_name(self) -> String {
        match self {
            Self::ROOT => String::new(),
            Self::DEFAULT => DEFAULT_GROUP_DIR.to_string(),
            Self::SYSTEM => SYSTEM_GROUP_DIR.to_string(),
            GroupId(id) => id.to_string(),
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for GroupId {
    fn from(id: u32) -> Self {
        GroupId(id)
    }
}

/// Which base directory a path is resolved against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseDir {
    /// The engine subtree (`<controller dir>/gpdb`)
    Engine,
    /// One level up: whatever limits the host or container imposes
    Parent,
}

/// Access bits required by a permission rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl Access {
    pub const R: Access = Access {
        read: true,
        write: false,
        exec: false,
    };
    pub const RW: Access = Access {
        read: true,
        write: true,
        exec: false,
    };
    pub const RWX: Access = Access {
        read: true,
        write: true,
        exec: true,
    };

    pub(crate) fn flags(self) -> nix::unistd::AccessFlags {
        use nix::unistd::AccessFlags;

        let mut flags = AccessFlags::empty();
        if self.read {
            flags |= AccessFlags::R_OK;
        }
        if self.write {
            flags |= AccessFlags::W_OK;
        }
        if self.exec {
            flags |= AccessFlags::X_OK;
        }
        flags
    }
}

/// Optional subsystem that self-detects availability while probing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Memory,
    Swap,
    Cpuset,
}

/// Process-wide capability flags
///
/// Seeded from configuration and overwritten with the outcome of probing
/// the root group. Atomic so the prober can update them through `&self`.
#[derive(Debug, Default)]
pub struct Capabilities {
    memory: AtomicBool,
    swap: AtomicBool,
    cpuset: AtomicBool,
}

impl Capabilities {
    pub fn new(memory: bool, swap: bool, cpuset: bool) -> Self {
        Self {
            memory: AtomicBool::new(memory),
            swap: AtomicBool::new(swap),
            cpuset: AtomicBool::new(cpuset),
        }
    }

    fn flag(&self, cap: Capability) -> &AtomicBool {
        match cap {
            Capability::Memory => &self.memory,
            Capability::Swap => &self.swap,
            Capability::Cpuset => &self.cpuset,
        }
    }

    pub fn get(&self, cap: Capability) -> bool {
        self.flag(cap).load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, cap: Capability, on: bool) {
        self.flag(cap).store(on, Ordering::Release);
    }

    pub fn memory(&self) -> bool {
        self.get(Capability::Memory)
    }

    pub fn swap(&self) -> bool {
        self.get(Capability::Swap)
    }

    pub fn cpuset(&self) -> bool {
        self.get(Capability::Cpuset)
    }

    /// Snapshot for display
    pub fn snapshot(&self) -> CapabilitySnapshot {
        CapabilitySnapshot {
            memory: self.memory(),
            swap: self.swap(),
            cpuset: self.cpuset(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub memory: bool,
    pub swap: bool,
    pub cpuset: bool,
}
