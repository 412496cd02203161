//! Resource group usage monitor
//!
//! Samples CPU and memory usage of resource groups through the cgroup
//! driver and aggregates it for logs and dashboards.

pub mod config;
pub mod monitor;
pub mod stats;

pub use config::MonitorConfig;
pub use monitor::{GroupSample, UsageMonitor};
pub use stats::{GroupStats, MonitorStats};
