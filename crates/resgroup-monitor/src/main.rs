use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use resgroup_core::cgroup::{CgroupOps, CgroupV1, GroupId};
use resgroup_core::VERSION;
use resgroup_monitor::{GroupSample, MonitorConfig, UsageMonitor};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Resource group usage monitor
///
/// Periodically samples CPU and memory usage of resource groups
#[derive(Parser, Debug)]
#[command(name = "resgroup-monitor")]
#[command(version = VERSION)]
#[command(about = "Resource group usage monitor", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/resgroup/monitor.toml")]
    config: PathBuf,

    /// Override the sampling interval, e.g. "10s"
    #[arg(short, long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Take two samples one interval apart and print them
    Once,

    /// Continuous sampling
    Watch,

    /// Generate default configuration file
    GenerateConfig {
        /// Output path for config file
        #[arg(short, long, default_value = "monitor.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::GenerateConfig { output }) = &cli.command {
        return generate_config(output);
    }

    let mut config = load_config(&cli.config)?;
    if let Some(interval) = cli.interval {
        config.sampling.interval_secs = interval.as_secs().max(1);
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;

    init_logging(&config)?;
    info!("resgroup-monitor v{} starting...", VERSION);

    let monitor = create_monitor(&config)?;
    let interval = Duration::from_secs(config.sampling.interval_secs);

    match cli.command {
        Some(Commands::Once) => run_once(monitor, interval).await?,
        Some(Commands::Watch) | None => run_watch_loop(monitor, &config, interval).await?,
        Some(Commands::GenerateConfig { .. }) => {}
    }

    Ok(())
}

/// Probe and check the driver, then wrap it in a monitor
fn create_monitor(config: &MonitorConfig) -> Result<UsageMonitor> {
    let mut ops = CgroupV1::new(config.driver.clone());
    if !ops.probe() {
        warn!("cgroup probe failed, the check below reports why");
    }
    ops.check().context("cgroup check failed")?;

    let info = ops.system_info()?;
    info!(
        "cgroup ready: {} cores, period {}us, parent quota {}",
        info.ncores, info.cfs_period_us, info.parent_cfs_quota_us
    );

    let groups = config.sampling.groups.iter().copied().map(GroupId).collect();
    Ok(UsageMonitor::new(Box::new(ops) as Box<dyn CgroupOps>, groups)
        .with_cpu_warn_percent(config.sampling.cpu_warn_percent))
}

/// Two sampling rounds, so CPU percentages are available
async fn run_once(mut monitor: UsageMonitor, interval: Duration) -> Result<()> {
    monitor.sample()?;
    sleep(interval).await;

    let samples = monitor.sample()?;
    for sample in &samples {
        println!("{}", serde_json::to_string(sample)?);
    }
    Ok(())
}

/// Run continuous sampling until interrupted
async fn run_watch_loop(
    mut monitor: UsageMonitor,
    config: &MonitorConfig,
    interval: Duration,
) -> Result<()> {
    info!(
        "Sampling {} groups every {}s",
        monitor.groups().len(),
        interval.as_secs()
    );

    loop {
        match monitor.sample() {
            Ok(samples) => samples.iter().for_each(log_sample),
            Err(e) => error!("Sampling failed: {}", e),
        }

        if config.stats.enabled {
            if let Err(e) = monitor.stats().save_to_file(&config.stats.path) {
                warn!("Failed to write stats to {:?}: {}", config.stats.path, e);
            }
        }

        tokio::select! {
            _ = sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!(
                    "Interrupted after {} checks, {}s runtime",
                    monitor.stats().total_checks,
                    monitor.stats().runtime_secs()
                );
                return Ok(());
            }
        }
    }
}

fn log_sample(sample: &GroupSample) {
    match sample.cpu_percent {
        Some(cpu) => info!(
            group = %sample.group,
            cpu_percent = cpu,
            memory_chunks = sample.memory_chunks,
            limit_chunks = sample.memory_limit_chunks,
            "usage sample"
        ),
        None => info!(
            group = %sample.group,
            memory_chunks = sample.memory_chunks,
            limit_chunks = sample.memory_limit_chunks,
            "first usage sample"
        ),
    }
}

/// Generate default configuration file
fn generate_config(output: &Path) -> Result<()> {
    MonitorConfig::default()
        .save_to_file(output)
        .with_context(|| format!("Failed to save configuration file {:?}", output))?;
    println!("Configuration written to {:?}", output);
    Ok(())
}

/// Load configuration from file or use defaults
fn load_config(path: &Path) -> Result<MonitorConfig> {
    if path.exists() {
        MonitorConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration file {:?}", path))
    } else {
        eprintln!("Configuration file not found: {:?}, using defaults", path);
        Ok(MonitorConfig::default())
    }
}

/// Initialize logging with file and stdout output
fn init_logging(config: &MonitorConfig) -> Result<()> {
    std::fs::create_dir_all(&config.logging.log_dir)?;

    let file_appender =
        tracing_appender::rolling::daily(&config.logging.log_dir, &config.logging.log_file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let (json_layer, text_layer) = if config.logging.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking);
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(true)
                .with_target(false),
        )
        .with(json_layer)
        .with(text_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // keep the file writer alive for the whole process
    std::mem::forget(guard);

    Ok(())
}
