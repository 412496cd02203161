use resgroup_core::ResGroupConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the usage monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Sampling settings
    pub sampling: SamplingConfig,

    /// Logging configuration
    pub logging: LogConfig,

    /// Stats export
    #[serde(default)]
    pub stats: StatsConfig,

    /// Driver settings passed to the cgroup backend
    #[serde(default)]
    pub driver: ResGroupConfig,
}

/// Which groups are sampled and how often
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Seconds between samples (default: 5)
    pub interval_secs: u64,

    /// Group ids to sample (default: [0, 1, 2], the engine root and the
    /// reserved groups)
    pub groups: Vec<u32>,

    /// CPU percentage above which a sample is logged as a warning
    /// (default: 90.0)
    pub cpu_warn_percent: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log directory path (default: ./logs/)
    pub log_dir: PathBuf,

    /// Daily rotated log file name (default: resgroup-monitor.log)
    pub log_file: String,

    /// Write file logs as JSON lines (default: false)
    pub json: bool,
}

/// Periodic JSON stats snapshot for dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Enable the snapshot (default: false)
    pub enabled: bool,

    /// Snapshot path (default: ./logs/resgroup-stats.json)
    pub path: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            logging: LogConfig::default(),
            stats: StatsConfig::default(),
            driver: ResGroupConfig::default(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            groups: vec![0, 1, 2],
            cpu_warn_percent: 90.0,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            log_file: "resgroup-monitor.log".to_string(),
            json: false,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("./logs/resgroup-stats.json"),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use resgroup_monitor::config::MonitorConfig;
    ///
    /// let config = MonitorConfig::load_from_file("/etc/resgroup/monitor.toml").unwrap();
    /// println!("interval: {}s", config.sampling.interval_secs);
    /// ```
    pub fn load_from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MonitorConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.sampling.interval_secs == 0 {
            return Err("Sampling interval must be > 0".to_string());
        }

        if self.sampling.groups.is_empty() {
            return Err("At least one group must be sampled".to_string());
        }

        if !(0.0..=100.0).contains(&self.sampling.cpu_warn_percent) {
            return Err(format!(
                "CPU warn percent must be 0-100, got: {}",
                self.sampling.cpu_warn_percent
            ));
        }

        if self.logging.log_file.is_empty() {
            return Err("Log file name must not be empty".to_string());
        }

        self.driver.validate().map_err(|e| e.to_string())
    }

    /// Get full path to the log file
    pub fn log_path(&self) -> PathBuf {
        self.logging.log_dir.join(&self.logging.log_file)
    }
}
