//! Resource group core library
//!
//! Cgroup v1 driver for a multi-process database engine: mount detection,
//! permission probing, group lifecycle, CPU/memory/cpuset quotas and usage
//! conversion.

pub mod accounting;
pub mod cgroup;
pub mod config;
pub mod error;
pub mod process;

pub use accounting::{ChunkAccounting, MemoryAccounting};
pub use cgroup::{CgroupError, CgroupOps, CgroupV1, Controller, GroupId, SystemInfo};
pub use config::ResGroupConfig;
pub use error::{Error, Result};
pub use process::ProcessRole;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
