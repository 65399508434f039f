//! idlestop - Idle-host self-shutdown monitor
//!
//! Watches worker marker files and process counts, stops the workers and
//! powers the host off once the configured idle/elapsed thresholds pass.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use idlestop_core::application::Runner;
use idlestop_core::domain::ShutdownSpecification;
use idlestop_core::port::env_provider::ProcessEnvProvider;
use idlestop_core::port::time_provider::SystemTimeProvider;
use idlestop_core::port::{CommandExecutor, TimeProvider};
use idlestop_core::VERSION;
use idlestop_infra_system::{
    signal_monitors, ErrorMarker, FileSignalProbe, HttpTerminationClient, Notifier,
    ShellCommandExecutor, TimestampSource,
};

use crate::config::{MarkerFiles, MonitorConfig, RawConfig};

const BINARY_NAME: &str = "idlestop";
const LOG_FORMAT_VAR: &str = "IDLESTOP_LOG_FORMAT";
const DEFAULT_LOG_FILTER: &str = "idlestop=info";

#[derive(Parser)]
#[command(name = "idlestop")]
#[command(about = "Stops workers and shuts the host down once it has been idle long enough")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long = "config-file", global = true, env = "IDLESTOP_CONFIG_FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor
    Start {
        /// Run as daemon
        #[arg(short = 'd', long)]
        daemonize: bool,

        /// Write logs to this file
        #[arg(short = 'o', long = "output-log")]
        output_log: Option<PathBuf>,
    },

    /// Send SIGQUIT to running monitors
    Stop,

    /// Stamp a marker file (called by workers)
    Notify {
        #[arg(value_enum)]
        event: NotifyEvent,
    },

    /// Parse a shutdown specification and show the thresholds it resolves to now
    CheckSpec {
        /// e.g. "idlePreWork:800+10,idlePostWork:22+10"; defaults to the
        /// configuration file's self_shutdown_specification
        spec: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum NotifyEvent {
    /// Workers started
    Start,
    /// A job completed
    Complete,
    /// A job failed
    Error,
    /// Remove all markers
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            daemonize,
            output_log,
        } => start(cli.config.as_deref(), daemonize, output_log),
        Commands::Stop => {
            let _guard = init_logging(None)?;
            stop()
        }
        Commands::Notify { event } => {
            let _guard = init_logging(None)?;
            notify(cli.config.as_deref(), event)
        }
        Commands::CheckSpec { spec } => {
            let spec = match (spec, cli.config.as_deref()) {
                (Some(spec), _) => Some(spec),
                (None, Some(path)) => RawConfig::load(path)?.self_shutdown_specification,
                (None, None) => None,
            };
            check_spec(spec.as_deref())
        }
    }
}

fn require_config(path: Option<&Path>) -> Result<&Path> {
    path.context("Must specify configuration file with -c or --config-file")
}

fn start(config_path: Option<&Path>, daemonize: bool, output_log: Option<PathBuf>) -> Result<()> {
    // Validate before detaching so configuration errors reach the terminal
    let config = MonitorConfig::load(require_config(config_path)?)?;
    let output_log = output_log.map(absolute).transpose()?;

    if daemonize {
        detach()?;
    }

    let _guard = init_logging(output_log.as_deref())?;
    info!(version = VERSION, pid = std::process::id(), "idlestop monitor starting");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(monitor(config))
}

async fn monitor(config: MonitorConfig) -> Result<()> {
    // Setup dependencies (DI wiring)
    let executor: Arc<dyn CommandExecutor> = match config.command_timeout {
        Some(limit) => Arc::new(ShellCommandExecutor::with_timeout(limit)),
        None => Arc::new(ShellCommandExecutor::new()),
    };
    let markers = &config.markers;
    let signal_probe = FileSignalProbe::new(
        TimestampSource::new(&markers.workers_start_file)
            .with_mtime_fallback(config.timestamp_mtime_fallback),
        TimestampSource::new(&markers.last_complete_file)
            .with_mtime_fallback(config.timestamp_mtime_fallback),
        ErrorMarker::new(&markers.last_error_file),
        config.running_census.clone(),
        config.working_census.clone(),
        Arc::clone(&executor),
    );
    let termination_client =
        HttpTerminationClient::new().context("Failed to build termination client")?;

    let runner = Runner::new(
        &config.self_shutdown_specification,
        config.runner_settings(),
        Arc::new(signal_probe),
        executor,
        Arc::new(termination_client),
        Arc::new(ProcessEnvProvider),
        Arc::new(SystemTimeProvider),
    )?;

    let thresholds = runner.current_thresholds();
    info!(
        specification = %runner.specification(),
        prework = ?thresholds.prework,
        postwork = ?thresholds.postwork,
        elapsed = ?thresholds.elapsed,
        running = %config.running_census.describe(),
        working = %config.working_census.describe(),
        sleep_secs = config.sleep_time.as_secs(),
        "Monitoring workers"
    );

    tokio::select! {
        report = runner.run() => {
            info!(
                trigger = %report.trigger,
                errors_present = report.errors_present,
                action = %report.action,
                "Shutdown issued, monitor exiting"
            );
            if let Some(e) = report.action_error {
                warn!(error = %e, "Shutdown action failed");
            }
        }
        signal = shutdown_signal() => {
            let signal = signal?;
            info!(signal, state = %runner.state(), "Signal received, monitor exiting");
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut quit = signal(SignalKind::quit()).context("SIGQUIT handler")?;
    let mut term = signal(SignalKind::terminate()).context("SIGTERM handler")?;

    tokio::select! {
        _ = quit.recv() => Ok("SIGQUIT"),
        _ = term.recv() => Ok("SIGTERM"),
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT").map_err(Into::into),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

/// Detach from the terminal; stdio goes to /dev/null
///
/// The working directory is kept so relative marker paths stay valid.
#[cfg(target_os = "linux")]
fn detach() -> Result<()> {
    nix::unistd::daemon(true, false).context("Failed to daemonize")
}

#[cfg(not(target_os = "linux"))]
fn detach() -> Result<()> {
    bail!("-d is only supported on Linux; use a service manager instead")
}

fn stop() -> Result<()> {
    let report = signal_monitors(BINARY_NAME);

    if report.signalled.is_empty() && report.errors.is_empty() {
        println!("No self-shutdown monitor to kill...");
        return Ok(());
    }
    for pid in &report.signalled {
        println!("Sent SIGQUIT to monitor {pid}");
    }
    if !report.errors.is_empty() {
        bail!("Could not signal: {}", report.errors.join(", "));
    }
    println!("Done killing self shutdown monitor");
    Ok(())
}

fn notify(config_path: Option<&Path>, event: NotifyEvent) -> Result<()> {
    let raw = RawConfig::load(require_config(config_path)?)?;
    let markers = MarkerFiles::from_raw(&raw)?;
    let notifier = Notifier::new(
        markers.workers_start_file,
        markers.last_complete_file,
        markers.last_error_file,
        Arc::new(SystemTimeProvider),
    );

    match event {
        NotifyEvent::Start => notifier.notify_worker_start(),
        NotifyEvent::Complete => notifier.notify_complete(),
        NotifyEvent::Error => notifier.notify_error(),
        NotifyEvent::Clear => notifier.clear(),
    }
    .with_context(|| format!("notify {event:?} failed"))
}

fn check_spec(spec: Option<&str>) -> Result<()> {
    let specification = ShutdownSpecification::parse_optional(spec)?;
    let now = SystemTimeProvider.now_local();
    let thresholds = specification.thresholds(&now);
    let show = |value: Option<u64>| value.map_or_else(|| "-".to_string(), |s| format!("{s}s"));

    println!("specification: {specification}");
    if specification.is_empty() {
        println!("no rules: the monitor would never trigger");
        return Ok(());
    }
    println!("windows:       {}", specification.windows().count());
    println!("at {}:", now.format("%H:%M:%S %:z"));
    println!("  idle prework:    {}", show(thresholds.prework));
    println!("  idle postwork:   {}", show(thresholds.postwork));
    println!("  elapsed prework: {}", show(thresholds.elapsed));
    Ok(())
}

fn init_logging(output_log: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let log_format = std::env::var(LOG_FORMAT_VAR).unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("Failed to create env filter")?;

    let (writer, guard) = match output_log {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create log directory {}", dir.display()))?;
            let file_name = path
                .file_name()
                .with_context(|| format!("Output log {} names no file", path.display()))?;
            let (non_blocking, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    match log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(writer))
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(output_log.is_none())
                    .with_writer(writer),
            )
            .try_init(),
    }
    .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(std::env::current_dir()
        .context("Cannot resolve current directory")?
        .join(path))
}
