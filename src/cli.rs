use crate::config::loader::LoaderConfig;
use crate::config::types::SourceRef;
use crate::exec::job::ImageJob;
use crate::kernel::seccomp::{allowed_syscall_names, containment_status, is_containment_supported};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode one image in a sandboxed worker and report the result as JSON
    Load {
        /// Image path, or "-" for standard input
        source: String,
        /// JSON loader configuration
        #[arg(long)]
        config: Option<PathBuf>,
        /// Result region size in MiB (overrides the config file)
        #[arg(long)]
        max_mb: Option<usize>,
        /// Decode without the syscall allow-list
        #[arg(long)]
        no_syscall_filter: bool,
        /// Delay between completion checks
        #[arg(long, default_value_t = 5)]
        poll_interval_ms: u64,
        /// Cancel the job if it has not completed within this many milliseconds
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
    /// Report whether syscall containment is available on this host
    Check,
}

/// Outcome of a `load` command
#[derive(Debug, Serialize)]
pub struct LoadReport {
    pub job_id: String,
    pub source: String,
    pub decoded: bool,
    pub broken: bool,
    pub timed_out: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub byte_size: Option<usize>,
    pub retained_capacity: usize,
    pub syscall_filter: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    containment_supported: bool,
    status: String,
    allowed_syscalls: Vec<&'static str>,
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Load {
            source,
            config,
            max_mb,
            no_syscall_filter,
            poll_interval_ms,
            timeout_ms,
        } => {
            let mut loader = match config {
                Some(path) => LoaderConfig::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => LoaderConfig::default(),
            };
            if let Some(mb) = max_mb {
                loader = loader.with_max_region_mb(mb);
            }
            if no_syscall_filter {
                loader = loader.with_syscall_filter(false);
            }

            let report = load(
                SourceRef::from_arg(&source),
                &loader,
                Duration::from_millis(poll_interval_ms),
                Duration::from_millis(timeout_ms),
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !report.decoded {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Check => {
            let report = CheckReport {
                containment_supported: is_containment_supported(),
                status: containment_status(),
                allowed_syscalls: allowed_syscall_names(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

/// Spawn, poll until done or `timeout`, and summarize.
///
/// The job is reset before returning, so a timed-out worker is killed.
pub fn load(
    source: SourceRef,
    config: &LoaderConfig,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<LoadReport> {
    let mut job = ImageJob::new();
    let start = Instant::now();
    let deadline = start + timeout;

    job.spawn(source.clone(), config)?;

    let mut timed_out = false;
    while !job.poll() {
        if Instant::now() >= deadline {
            log::warn!("Job {}: no result after {:?}; cancelling", job.id(), timeout);
            timed_out = true;
            break;
        }
        std::thread::sleep(poll_interval);
    }

    let image = if timed_out { None } else { job.image() };
    let report = LoadReport {
        job_id: job.id().to_string(),
        source: source.to_string(),
        decoded: image.is_some(),
        broken: job.is_broken() || timed_out,
        timed_out,
        width: image.map(|i| i.width),
        height: image.map(|i| i.height),
        byte_size: image.map(|i| i.pixels.len()),
        retained_capacity: job.capacity(),
        syscall_filter: config.syscall_filter,
        elapsed_ms: start.elapsed().as_millis() as u64,
    };

    job.reset()?;
    Ok(report)
}
