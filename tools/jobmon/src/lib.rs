pub mod banner;
mod barrier;
pub mod config;
pub mod errors;
pub mod input;
pub mod lifecycle;
pub mod logging;
pub mod monitor;
mod render;
pub mod runtime;
pub mod screen;
pub mod signals;
mod state;
pub mod task;
pub mod workload;

use clap::{error::ErrorKind, Parser};
use config::{load_config, CliOverrides, MonitorConfig};
use errors::MonitorError;
use monitor::RunReport;
use runtime::MonitorRuntime;
use std::ffi::OsString;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use workload::JobStats;

pub use monitor::{start, start_with, Monitor, Worker};

#[derive(Debug, Clone, Parser)]
#[command(name = "jobmon")]
#[command(about = "Run a simulated job batch under the terminal monitor")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
    #[arg(long)]
    pub banner: Option<String>,
    #[arg(long)]
    pub parallel: Option<u32>,
    #[arg(long)]
    pub jobs: Option<u32>,
    #[arg(long)]
    pub job_millis: Option<u64>,
    /// Job number whose worker fails, to exercise fault reporting.
    #[arg(long)]
    pub fail_job: Option<u32>,
    #[arg(long)]
    pub log: Option<std::path::PathBuf>,
}

pub fn run() -> Result<i32, MonitorError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let Some(cfg) = parse_cli(&args)? else {
        return Ok(0);
    };
    let runtime = MonitorRuntime::production()?;
    let mut stderr = std::io::stderr();
    run_with_runtime(&cfg, runtime, &mut stderr)
}

/// Parses arguments into a validated config. `None` means help or version
/// was printed and there is nothing to run.
pub fn parse_cli(args: &[OsString]) -> Result<Option<MonitorConfig>, MonitorError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(None);
            }
            _ => return Err(MonitorError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config,
        banner: cli.banner,
        parallel: cli.parallel,
        jobs: cli.jobs,
        job_millis: cli.job_millis,
        fail_job: cli.fail_job,
        log_path: cli.log,
    };
    load_config(&overrides).map(Some)
}

/// Runs the batch and writes the final statistics to `summary` once the
/// terminal has been handed back.
pub fn run_with_runtime(
    cfg: &MonitorConfig,
    runtime: MonitorRuntime,
    summary: &mut dyn Write,
) -> Result<i32, MonitorError> {
    let stats = Arc::new(Mutex::new(JobStats::new(cfg.workload.jobs)));
    let workload = cfg.workload.clone();
    let entry_stats = Arc::clone(&stats);
    let report: RunReport = start_with(cfg, runtime, move |worker| {
        workload::coordinate(worker, &workload, &entry_stats)
    })?;

    let line = stats
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .summary();
    writeln!(summary, "{line}").map_err(|e| MonitorError::Io(e.to_string()))?;
    Ok(report.exit_code())
}
