use anyhow::{Context, Result};
use byte_unit::{Byte, UnitType};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::*;
use resgroup_core::cgroup::{CgroupOps, CgroupV1, Controller, GroupId};
use resgroup_core::{ResGroupConfig, VERSION};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Parser)]
#[command(name = "resgroupctl")]
#[command(version = VERSION)]
#[command(about = "Resource group cgroup v1 driver - operator CLI", long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used when missing)
    #[arg(short, long, env = "RESGROUP_CONFIG")]
    config: Option<PathBuf>,

    /// Override the cgroup mount dir, e.g. /sys/fs/cgroup
    #[arg(long, global = true)]
    mount_dir: Option<PathBuf>,

    /// Print machine readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the cgroup layout without failing
    Probe,

    /// Verify permissions and show system info
    Check,

    /// Configure the engine root and create the reserved groups
    Init,

    /// Create a group
    Create {
        #[arg(value_parser = parse_group)]
        group: GroupId,
    },

    /// Destroy a group, moving its processes to the default group
    Destroy {
        #[arg(value_parser = parse_group)]
        group: GroupId,

        /// Fail instead of migrating remaining processes
        #[arg(long)]
        no_migrate: bool,
    },

    /// Move a process into a group
    Attach {
        #[arg(value_parser = parse_group)]
        group: GroupId,

        /// Process id (default: this process)
        #[arg(short, long)]
        pid: Option<u32>,

        /// Use the group's own cpuset instead of the default one
        #[arg(long)]
        cpuset: bool,
    },

    /// Try the group's directory lock
    Lock {
        #[arg(value_parser = parse_group)]
        group: GroupId,

        #[arg(short, long, default_value = "cpu")]
        controller: Controller,

        /// Wait for the lock instead of failing
        #[arg(long)]
        block: bool,

        /// Hold the lock for this long, e.g. "5s"
        #[arg(long, value_parser = humantime_duration)]
        hold: Option<Duration>,
    },

    /// CPU limits
    Cpu {
        #[command(subcommand)]
        action: CpuAction,
    },

    /// Memory limits
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Cpuset pinning
    Cpuset {
        #[command(subcommand)]
        action: CpusetAction,
    },

    /// Sample CPU and memory usage of a group
    Usage {
        #[arg(value_parser = parse_group, default_value = "root")]
        group: GroupId,

        /// Sampling window, e.g. "1s" or "500ms"
        #[arg(short, long, default_value = "1s", value_parser = humantime_duration)]
        interval: Duration,
    },

    /// Memory the engine should plan against
    TotalMemory,

    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CpuAction {
    /// Set the group's CPU share in percent
    Set {
        #[arg(value_parser = parse_group)]
        group: GroupId,
        #[arg(value_parser = clap::value_parser!(i32).range(0..=100))]
        percent: i32,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Show usage and limit in chunks
    Get {
        #[arg(value_parser = parse_group)]
        group: GroupId,
    },

    /// Set the limit as a percentage of the vmem budget
    Set {
        #[arg(value_parser = parse_group)]
        group: GroupId,
        #[arg(value_parser = clap::value_parser!(i32).range(0..=100))]
        percent: i32,
    },

    /// Set the limit in chunks
    SetChunks {
        #[arg(value_parser = parse_group)]
        group: GroupId,
        chunks: i32,
    },
}

#[derive(Subcommand)]
enum CpusetAction {
    Get {
        #[arg(value_parser = parse_group)]
        group: GroupId,
    },

    /// Pin the group to cores, e.g. "0,2-3"
    Set {
        #[arg(value_parser = parse_group)]
        group: GroupId,
        cpuset: String,
    },
}

/// Accept reserved group names besides numeric handles
fn parse_group(s: &str) -> std::result::Result<GroupId, String> {
    match s {
        "root" => Ok(GroupId::ROOT),
        "default" => Ok(GroupId::DEFAULT),
        "system" => Ok(GroupId::SYSTEM),
        _ => s
            .parse::<u32>()
            .map(GroupId)
            .map_err(|_| format!("invalid group '{}': expected a number, root, default or system", s)),
    }
}

/// Refuse groups whose removal would take the engine's own processes along
fn check_destroy_target(group: GroupId, migrate: bool) -> Result<()> {
    if group.is_root() {
        anyhow::bail!("refusing to destroy the engine root group");
    }
    if group == GroupId::DEFAULT && migrate {
        anyhow::bail!("refusing to migrate the default group into itself, use --no-migrate");
    }
    Ok(())
}

fn humantime_duration(s: &str) -> std::result::Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "❌ Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "resgroupctl", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = load_config(cli.config.as_ref())?;
    if cli.mount_dir.is_some() {
        config.mount_dir = cli.mount_dir.clone();
    }

    let mut driver = CgroupV1::new(config);
    let usable = driver.probe();
    debug!(usable, "probed cgroup");

    match cli.command {
        Commands::Probe => show_probe(&driver, usable, cli.json),
        Commands::Check => {
            driver.check()?;
            show_check(&driver, cli.json)
        }
        command => {
            driver.check()?;
            run_command(&driver, command, cli.json)
        }
    }
}

fn run_command(ops: &CgroupV1, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Init => {
            ops.init()?;
            println!("{}", "✅ cgroup initialized".green());
        }
        Commands::Create { group } => {
            ops.create(group)
                .with_context(|| format!("can't create resource group {}", group))?;
            println!("{} {}", "✅ Created group".green(), group);
        }
        Commands::Destroy { group, no_migrate } => {
            check_destroy_target(group, !no_migrate)?;
            ops.destroy(group, !no_migrate)
                .with_context(|| format!("can't remove resource group {}", group))?;
            println!("{} {}", "✅ Destroyed group".green(), group);
        }
        Commands::Attach { group, pid, cpuset } => {
            let pid = pid.unwrap_or_else(std::process::id);
            ops.attach(group, pid, cpuset)?;
            println!("{} {} -> group {}", "✅ Attached".green(), pid, group);
        }
        Commands::Lock {
            group,
            controller,
            block,
            hold,
        } => match ops.lock(group, controller, block)? {
            Some(lock) => {
                println!("{} {}", "🔒 Locked".green(), lock.path().display());
                if let Some(hold) = hold {
                    std::thread::sleep(hold);
                }
                lock.unlock();
            }
            None => {
                println!("{}", "⚠️  Group is locked by another process".yellow());
                std::process::exit(2);
            }
        },
        Commands::Cpu {
            action: CpuAction::Set { group, percent },
        } => {
            ops.set_cpu_limit(group, percent)?;
            println!("{} group {} cpu {}%", "✅".green(), group, percent);
        }
        Commands::Memory { action } => run_memory(ops, action, json)?,
        Commands::Cpuset { action } => match action {
            CpusetAction::Get { group } => match ops.get_cpuset(group)? {
                Some(cpus) => println!("{}", cpus),
                None => println!("{}", "cpuset support is disabled".yellow()),
            },
            CpusetAction::Set { group, cpuset } => {
                ops.set_cpuset(group, &cpuset)?;
                println!("{} group {} cpuset {}", "✅".green(), group, cpuset);
            }
        },
        Commands::Usage { group, interval } => show_usage(ops, group, interval, json)?,
        Commands::TotalMemory => {
            let mb = ops.get_total_memory()?;
            if json {
                println!("{}", serde_json::json!({ "total_memory_mb": mb }));
            } else {
                println!("Total memory: {} ({} MB)", human_bytes(mb << 20), mb);
            }
        }
        Commands::Probe | Commands::Check | Commands::Completions { .. } => {}
    }
    Ok(())
}

fn run_memory(ops: &CgroupV1, action: MemoryAction, json: bool) -> Result<()> {
    match action {
        MemoryAction::Get { group } => {
            let usage = ops.get_memory_usage(group)?;
            let limit = ops.get_memory_limit_chunks(group)?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "group": group, "usage_chunks": usage, "limit_chunks": limit })
                );
            } else {
                println!("Group {}", group);
                println!("  Usage: {} chunks", usage);
                if limit == i32::MAX {
                    println!("  Limit: unlimited");
                } else {
                    println!("  Limit: {} chunks", limit);
                }
            }
        }
        MemoryAction::Set { group, percent } => {
            ops.set_memory_limit(group, percent)?;
            println!("{} group {} memory {}%", "✅".green(), group, percent);
        }
        MemoryAction::SetChunks { group, chunks } => {
            ops.set_memory_limit_by_chunks(group, chunks)?;
            println!("{} group {} memory {} chunks", "✅".green(), group, chunks);
        }
    }
    Ok(())
}

fn show_probe(ops: &CgroupV1, usable: bool, json: bool) -> Result<()> {
    let caps = ops.capabilities();

    if json {
        let layout = ops.layout().ok();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "usable": usable,
                "capabilities": caps,
                "layout": layout,
            }))?
        );
        return Ok(());
    }

    println!("{}", "=== cgroup probe ===".green().bold());
    if usable {
        println!("{}", "✅ cgroup v1 is usable".green());
    } else {
        println!("{}", "⚠️  cgroup v1 is not usable, run `check` for details".yellow());
    }

    if let Ok(layout) = ops.layout() {
        println!("  Mount:  {}", layout.mount_dir().display());
        for controller in Controller::ALL {
            println!(
                "  {:<8} {}",
                controller.name(),
                layout.engine_dir(controller).display()
            );
        }
    }
    println!(
        "  Memory: {}  Swap: {}  Cpuset: {}",
        flag(caps.memory),
        flag(caps.swap),
        flag(caps.cpuset)
    );
    Ok(())
}

fn show_check(ops: &CgroupV1, json: bool) -> Result<()> {
    let info = ops.system_info()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("{}", "✅ cgroup check passed".green());
    println!("  Cores:        {}", info.ncores);
    println!("  CFS period:   {} us", info.cfs_period_us);
    println!("  System quota: {} us", info.system_cfs_quota_us);
    if info.parent_cfs_quota_us > 0 {
        println!("  Parent quota: {} us", info.parent_cfs_quota_us);
    } else {
        println!("  Parent quota: unlimited");
    }
    Ok(())
}

fn show_usage(ops: &CgroupV1, group: GroupId, interval: Duration, json: bool) -> Result<()> {
    let start = Instant::now();
    let before = ops.get_cpu_usage(group)?;
    std::thread::sleep(interval);
    let after = ops.get_cpu_usage(group)?;
    let elapsed = start.elapsed().as_micros().max(1) as i64;

    let cpu = ops.convert_cpu_usage(after - before, elapsed)?;
    let memory = ops.get_memory_usage(group)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "group": group, "cpu_percent": cpu, "memory_chunks": memory })
        );
        return Ok(());
    }

    let cpu_text = format!("{:.1}%", cpu);
    let cpu_text = if cpu > 90.0 {
        cpu_text.red()
    } else {
        cpu_text.green()
    };
    println!("Group {}", group);
    println!("  CPU:    {}", cpu_text);
    println!("  Memory: {} chunks", memory);
    Ok(())
}

fn flag(on: bool) -> ColoredString {
    if on {
        "on".green()
    } else {
        "off".red()
    }
}

fn human_bytes(bytes: u64) -> String {
    format!(
        "{:.2}",
        Byte::from_u64(bytes).get_appropriate_unit(UnitType::Binary)
    )
}

fn load_config(path: Option<&PathBuf>) -> Result<ResGroupConfig> {
    match path {
        Some(path) => ResGroupConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration file {}", path.display())),
        None => Ok(ResGroupConfig::default()),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}
