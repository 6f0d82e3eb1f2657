mod args;
mod display;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use vigil_core::colors::StatusPalette;
use vigil_core::output::{get_formatter, OutputFormat};
use vigil_core::schedule::{RecoveryCallback, SchedulerEvent};
use vigil_core::{
    CheckOptions, CheckRecord, DomainCheckResult, DomainChecker, JsonFileSink, LaneScheduler,
    RecoveryScheduler, RunReport, StorageSink,
};

use crate::args::ConfigArgs;
use crate::display::{EventLog, LogMode, ProgressWriterFactory, RunProgress};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Domain liveness checker - DNS/TCP reachability, HTTP(S) and TLS inspection")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (human or json)
    #[arg(short, long, global = true, default_value = "human")]
    format: String,

    /// Append JSON log lines to this file
    #[arg(long, global = true, env = "LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every domain in a list: main pass, second pass, report
    Run {
        /// Domain list: {"domains":[{"domain":..}]}, a JSON array, or one per line
        #[arg(env = "DATA_FILE")]
        file: PathBuf,

        /// Where to write the status snapshot
        #[arg(short, long, env = "OUTPUT_FILE", default_value = "status.json")]
        output: PathBuf,

        /// progress, stream or fail
        #[arg(long, env = "LOG_MODE", value_enum, default_value_t = LogMode::Progress)]
        log_mode: LogMode,

        /// Disable colours in log lines
        #[arg(long, env = "NO_COLOR")]
        no_color: bool,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Check a single domain and print the full result
    Check {
        /// Domain name to check
        domain: String,

        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(fmt::layer().json().with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_writer(ProgressWriterFactory))
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let output_format: OutputFormat = cli.format.parse().unwrap_or_default();

    let outcome = match cli.command {
        Commands::Run {
            file,
            output,
            log_mode,
            no_color,
            config,
        } => run(&file, &output, log_mode, !no_color, config, output_format).await,
        Commands::Check { domain, config } => check(&domain, config, output_format).await,
    };

    if let Err(e) = outcome {
        eprintln!("{} {:#}", "Error:".bad(), e);
        std::process::exit(1);
    }
    Ok(())
}

async fn check(domain: &str, args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let domain = vigil_core::normalize_domain(domain)?;
    let config = args.resolve()?;
    let checker = vigil_core::live_checker(&config)?;

    let result = {
        let _spinner = RunProgress::spinner(&format!("Checking {}...", domain));
        checker
            .check(&domain, CheckOptions::default())
            .await
            .into_result()
            .context("check was cancelled")?
    };

    println!("{}", get_formatter(format).format_result(&result));
    Ok(())
}

async fn run(
    file: &Path,
    output: &Path,
    log_mode: LogMode,
    colors: bool,
    args: ConfigArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let config = args.resolve()?;
    let domains = vigil_core::load_domains(file)
        .await
        .with_context(|| format!("loading domains from {}", file.display()))?;
    if domains.is_empty() {
        anyhow::bail!(
            "No valid domains found in {}. Expected {{\"domains\":[...]}}, a JSON array, or one domain per line",
            file.display()
        );
    }

    info!(domains = domains.len(), file = %file.display(), "Domain list loaded");

    let checker = Arc::new(vigil_core::live_checker(&config)?);
    let checked_at = Utc::now();
    let started = Instant::now();

    let mut results = {
        let progress = (log_mode == LogMode::Progress)
            .then(|| RunProgress::bar(domains.len(), "main"));
        let log = EventLog::new(log_mode, colors, progress.as_ref().map(RunProgress::handle));
        LaneScheduler::new(Arc::clone(&checker), &config)
            .with_events(Box::new(move |event: &SchedulerEvent<'_>| log.handle(event)))
            .run(&domains)
            .await
    };

    let second_pass = if config.second_pass.enabled {
        let offline = results.iter().filter(|r| !r.is_online()).count();
        let progress = (log_mode == LogMode::Progress && offline > 0)
            .then(|| RunProgress::bar(offline, "second pass"));
        let log = EventLog::new(log_mode, colors, progress.as_ref().map(RunProgress::handle));
        let callback: RecoveryCallback = Box::new(
            move |done: usize, _total: usize, result: &DomainCheckResult| log.recovery(done, result),
        );
        let stats = RecoveryScheduler::new(Arc::clone(&checker), &config)
            .run(&mut results, Some(callback))
            .await;
        Some(stats)
    } else {
        None
    };

    let elapsed = started.elapsed();
    let record = CheckRecord::new(checked_at, elapsed, &results, second_pass);
    let sink = JsonFileSink::new(output);
    sink.store(&record, &results)
        .await
        .with_context(|| format!("writing {}", output.display()))?;

    let report = RunReport::build(&results, elapsed, second_pass);
    println!("{}", get_formatter(format).format_report(&report));
    if format == OutputFormat::Human {
        println!(
            "\n{} {} ({})",
            "Results written to".muted(),
            output.display().to_string().good(),
            record.check_id
        );
    }
    Ok(())
}
