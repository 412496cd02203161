use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Resource group driver configuration
///
/// Switches name what the operator allows; whether swap, memory and cpuset
/// accounting actually get used is settled by probing the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResGroupConfig {
    /// cgroup v1 mount base, auto-detected from the mount table when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_dir: Option<PathBuf>,

    /// procfs root (default: /proc)
    pub proc_root: PathBuf,

    /// Enable memory accounting (default: true)
    pub enable_cgroup_memory: bool,

    /// Enable swap accounting (default: true)
    pub enable_cgroup_swap: bool,

    /// Enable cpuset support (default: true)
    pub enable_cgroup_cpuset: bool,

    /// Treat missing memory permissions as non-fatal (default: false)
    pub memory_is_optional: bool,

    /// Treat missing cpuset permissions as non-fatal (default: false)
    pub cpuset_is_optional: bool,

    /// Write hard CPU quotas for groups (default: false)
    pub cpu_ceiling_enforcement: bool,

    /// Engine root cpu.shares multiplier over the parent (default: 10)
    pub cpu_priority: i64,

    /// Fraction of the system (or parent) CPU quota the engine may use
    /// (default: 0.9)
    pub cpu_limit: f64,

    /// Permission polls after creating a group dir (default: 10)
    pub create_retries: u32,

    /// Sleep between polls in microseconds (default: 1000)
    pub create_retry_interval_us: u64,
}

impl Default for ResGroupConfig {
    fn default() -> Self {
        Self {
            mount_dir: None,
            proc_root: PathBuf::from("/proc"),
            enable_cgroup_memory: true,
            enable_cgroup_swap: true,
            enable_cgroup_cpuset: true,
            memory_is_optional: false,
            cpuset_is_optional: false,
            cpu_ceiling_enforcement: false,
            cpu_priority: 10,
            cpu_limit: 0.9,
            create_retries: 10,
            create_retry_interval_us: 1000,
        }
    }
}

impl ResGroupConfig {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use resgroup_core::config::ResGroupConfig;
    ///
    /// let config = ResGroupConfig::load_from_file("/etc/resgroup/config.toml").unwrap();
    /// println!("cpu priority: {}", config.cpu_priority);
    /// ```
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ResGroupConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(self.cpu_limit > 0.0 && self.cpu_limit <= 1.0) {
            return Err(Error::Config(format!(
                "cpu_limit must be in (0, 1], got: {}",
                self.cpu_limit
            )));
        }

        if self.cpu_priority < 1 {
            return Err(Error::Config(format!(
                "cpu_priority must be >= 1, got: {}",
                self.cpu_priority
            )));
        }

        if self.create_retries == 0 {
            return Err(Error::Config("create_retries must be > 0".to_string()));
        }

        Ok(())
    }
}
