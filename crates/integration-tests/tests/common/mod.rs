//! Shared fixtures: a host with marker files in a temp dir and scripted
//! `pgrep` answers.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use idlestop_core::application::{Runner, RunnerSettings};
use idlestop_core::port::command_executor::mocks::MockCommandExecutor;
use idlestop_core::port::env_provider::mocks::MockEnvProvider;
use idlestop_core::port::termination::mocks::MockTerminationClient;
use idlestop_core::port::time_provider::mocks::MockTimeProvider;
use idlestop_core::port::{CommandExecutor, CommandOutput};
use idlestop_infra_system::census::pgrep_command;
use idlestop_infra_system::{ErrorMarker, FileSignalProbe, ProcessCensus, TimestampSource};

pub const STOP_SCRIPT: &str = "/opt/workers/stop_workers.sh";
pub const LOCAL_SHUTDOWN: &str = "sudo shutdown -h now";
pub const RUNNING_REGEX: &str = "^resque-";
pub const WORKING_REGEX: &str = "^resque-.*: Processing";

/// 2018-07-25 11:16:00 EDT
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 7, 25, 15, 16, 0).unwrap()
}

pub fn stamp(at: DateTime<Utc>) -> String {
    format!("{}\n", at.format("%Y-%m-%d %H:%M:%S UTC"))
}

/// Counts answered by successive reads; the last one repeats
fn script(counts: Vec<u32>) -> Arc<Mutex<VecDeque<u32>>> {
    Arc::new(Mutex::new(counts.into_iter().collect()))
}

fn next(counts: &Mutex<VecDeque<u32>>) -> u32 {
    let mut counts = counts.lock().unwrap();
    if counts.len() > 1 {
        counts.pop_front().unwrap_or(0)
    } else {
        counts.front().copied().unwrap_or(0)
    }
}

pub struct Host {
    pub dir: TempDir,
    pub executor: Arc<MockCommandExecutor>,
    pub termination: Arc<MockTerminationClient>,
    pub clock: Arc<MockTimeProvider>,
    pub env: MockEnvProvider,
}

impl Host {
    /// `running` / `working`: pgrep answers for each pattern, in order
    pub fn new(running: Vec<u32>, working: Vec<u32>) -> Self {
        let running = script(running);
        let working = script(working);
        let running_cmd = pgrep_command(RUNNING_REGEX);
        let working_cmd = pgrep_command(WORKING_REGEX);

        let executor = MockCommandExecutor::new(move |cmd| {
            let count = if cmd == running_cmd {
                next(&running)
            } else if cmd == working_cmd {
                next(&working)
            } else {
                return Ok(CommandOutput::default());
            };
            Ok(CommandOutput::from_stdout(format!("{count}\n")))
        });

        Self {
            dir: tempfile::tempdir().unwrap(),
            executor: Arc::new(executor),
            termination: Arc::new(MockTerminationClient::new("i-0123456789abcdef0")),
            clock: Arc::new(MockTimeProvider::new(now())),
            env: MockEnvProvider::new(),
        }
    }

    pub fn workers_start_file(&self) -> PathBuf {
        self.dir.path().join("workersStartedUTC.txt")
    }

    pub fn last_complete_file(&self) -> PathBuf {
        self.dir.path().join("latestJobCompleteUTC.txt")
    }

    pub fn last_error_file(&self) -> PathBuf {
        self.dir.path().join("latestJobErrorUTC.txt")
    }

    pub fn workers_started_ago(&self, secs: i64) {
        fs::write(self.workers_start_file(), stamp(now() - Duration::seconds(secs))).unwrap();
    }

    pub fn completed_ago(&self, secs: i64) {
        fs::write(self.last_complete_file(), stamp(now() - Duration::seconds(secs))).unwrap();
    }

    pub fn runner(&self, spec: &str) -> Runner {
        let executor: Arc<dyn CommandExecutor> = self.executor.clone();
        let probe = FileSignalProbe::new(
            TimestampSource::new(self.workers_start_file()),
            TimestampSource::new(self.last_complete_file()),
            ErrorMarker::new(self.last_error_file()),
            ProcessCensus::Pgrep {
                pattern: RUNNING_REGEX.to_string(),
            },
            ProcessCensus::Pgrep {
                pattern: WORKING_REGEX.to_string(),
            },
            Arc::clone(&executor),
        );

        Runner::new(
            spec,
            RunnerSettings::new(STOP_SCRIPT),
            Arc::new(probe),
            executor,
            self.termination.clone(),
            Arc::new(self.env.clone()),
            self.clock.clone(),
        )
        .unwrap()
    }

    /// Commands other than the process censuses, in order
    pub fn actions(&self) -> Vec<String> {
        self.executor
            .calls()
            .into_iter()
            .filter(|cmd| !cmd.starts_with("pgrep "))
            .collect()
    }
}
