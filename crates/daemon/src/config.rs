//! Configuration file loading
//!
//! JSON file read with the `config` crate; every key can be overridden by an
//! `IDLESTOP_<KEY>` environment variable (e.g. `IDLESTOP_SLEEP_TIME=60`).

use config::{Config, Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use idlestop_core::application::runner::constants::{
    DEFAULT_LOCAL_SHUTDOWN_COMMAND, DEFAULT_SLEEP_TIME, DEFAULT_SLEEP_TIME_DURING_SHUTDOWN,
};
use idlestop_core::application::RunnerSettings;
use idlestop_core::domain::ShutdownSpecification;
use idlestop_core::{AppError, Result};
use idlestop_infra_system::ProcessCensus;

const ENV_PREFIX: &str = "IDLESTOP";

/// How worker processes are counted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CensusKind {
    #[default]
    Pgrep,
    ProcessTable,
    MarkerDir,
}

/// Configuration file as written; nothing validated yet
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    pub stop_runners_script: Option<String>,
    pub process_running_regex: Option<String>,
    pub process_working_regex: Option<String>,
    #[serde(default)]
    pub process_census: CensusKind,
    pub process_marker_dir: Option<String>,
    pub last_complete_file: Option<String>,
    pub last_error_file: Option<String>,
    pub workers_start_file: Option<String>,
    #[serde(default)]
    pub timestamp_mtime_fallback: bool,
    pub self_shutdown_specification: Option<String>,
    pub sleep_time: Option<u64>,
    pub sleep_time_during_shutdown: Option<u64>,
    pub shutdown_command: Option<String>,
    pub command_timeout: Option<u64>,
}

impl RawConfig {
    /// Read `path` (JSON) and apply `IDLESTOP_*` overrides
    pub fn load(path: &Path) -> Result<Self> {
        let path = expand(&path.to_string_lossy());
        if !path.is_file() {
            return Err(AppError::Config(format!(
                "Configuration file {} does not exist",
                path.display()
            )));
        }

        Config::builder()
            .add_source(File::from(path.as_path()).format(FileFormat::Json))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize::<RawConfig>())
            .map_err(|e| {
                AppError::Config(format!(
                    "Problem parsing JSON configuration file {}: {e}",
                    path.display()
                ))
            })
    }
}

/// The three marker files shared by the monitor and the notifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerFiles {
    pub workers_start_file: PathBuf,
    pub last_complete_file: PathBuf,
    pub last_error_file: PathBuf,
}

impl MarkerFiles {
    pub fn from_raw(raw: &RawConfig) -> Result<Self> {
        Ok(Self {
            workers_start_file: required_path(&raw.workers_start_file, "workers_start_file")?,
            last_complete_file: required_path(&raw.last_complete_file, "last_complete_file")?,
            last_error_file: required_path(&raw.last_error_file, "last_error_file")?,
        })
    }
}

/// Validated monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub stop_runners_script: PathBuf,
    pub running_census: ProcessCensus,
    pub working_census: ProcessCensus,
    pub markers: MarkerFiles,
    pub timestamp_mtime_fallback: bool,
    pub self_shutdown_specification: String,
    pub sleep_time: Duration,
    pub sleep_time_during_shutdown: Duration,
    pub shutdown_command: String,
    /// Deadline for every shell-out; `None` waits as long as it takes
    pub command_timeout: Option<Duration>,
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_raw(RawConfig::load(path)?)
    }

    /// Validate everything the monitor needs before it starts polling
    pub fn from_raw(raw: RawConfig) -> Result<Self> {
        let stop_runners_script = required_path(&raw.stop_runners_script, "stop_runners_script")?;
        if !stop_runners_script.exists() {
            return Err(AppError::Config(format!(
                "stop_runners_script {} does not exist",
                stop_runners_script.display()
            )));
        }

        let running = required(&raw.process_running_regex, "process_running_regex")?;
        let working = required(&raw.process_working_regex, "process_working_regex")?;
        let marker_dir = match raw.process_census {
            CensusKind::MarkerDir => Some(required_path(
                &raw.process_marker_dir,
                "process_marker_dir",
            )?),
            _ => None,
        };
        let running_census = census(raw.process_census, running, marker_dir.as_deref())?;
        let working_census = census(raw.process_census, working, marker_dir.as_deref())?;

        let spec = required(
            &raw.self_shutdown_specification,
            "self_shutdown_specification",
        )?;
        ShutdownSpecification::parse(&spec)?;

        let sleep_time = seconds(raw.sleep_time, DEFAULT_SLEEP_TIME, "sleep_time")?;
        let sleep_time_during_shutdown = seconds(
            raw.sleep_time_during_shutdown,
            DEFAULT_SLEEP_TIME_DURING_SHUTDOWN,
            "sleep_time_during_shutdown",
        )?;

        let command_timeout = raw
            .command_timeout
            .map(|secs| seconds(Some(secs), Duration::ZERO, "command_timeout"))
            .transpose()?;

        let shutdown_command = raw
            .shutdown_command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_LOCAL_SHUTDOWN_COMMAND)
            .to_string();

        Ok(Self {
            stop_runners_script,
            running_census,
            working_census,
            markers: MarkerFiles::from_raw(&raw)?,
            timestamp_mtime_fallback: raw.timestamp_mtime_fallback,
            self_shutdown_specification: spec,
            sleep_time,
            sleep_time_during_shutdown,
            shutdown_command,
            command_timeout,
        })
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            sleep_time: self.sleep_time,
            sleep_time_during_shutdown: self.sleep_time_during_shutdown,
            stop_workers_command: self.stop_runners_script.to_string_lossy().into_owned(),
            local_shutdown_command: self.shutdown_command.clone(),
        }
    }
}

fn required(value: &Option<String>, key: &str) -> Result<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::Config(format!("Must specify {key}")))
}

fn required_path(value: &Option<String>, key: &str) -> Result<PathBuf> {
    required(value, key).map(|v| expand(&v))
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

fn seconds(value: Option<u64>, default: Duration, key: &str) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(0) => Err(AppError::Config(format!("{key} must be at least 1 second"))),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}

fn census(kind: CensusKind, pattern: String, marker_dir: Option<&Path>) -> Result<ProcessCensus> {
    let compile = |pattern: &str| {
        Regex::new(pattern)
            .map_err(|e| AppError::Config(format!("Invalid process pattern '{pattern}': {e}")))
    };

    match (kind, marker_dir) {
        (CensusKind::Pgrep, _) => Ok(ProcessCensus::Pgrep { pattern }),
        (CensusKind::ProcessTable, _) => Ok(ProcessCensus::ProcessTable {
            pattern: compile(&pattern)?,
        }),
        (CensusKind::MarkerDir, Some(dir)) => Ok(ProcessCensus::MarkerDir {
            dir: dir.to_path_buf(),
            pattern: compile(&pattern)?,
        }),
        (CensusKind::MarkerDir, None) => {
            Err(AppError::Config("Must specify process_marker_dir".to_string()))
        }
    }
}
