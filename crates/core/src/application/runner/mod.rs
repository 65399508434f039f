// Runner - Self-shutdown decision loop

pub mod constants;
mod shutdown_action;

use constants::*;
pub use shutdown_action::ShutdownAction;

use crate::domain::{evaluate, ShutdownSpecification, SignalSnapshot, Thresholds, TriggerReason};
use crate::error::{AppError, Result};
use crate::port::{
    CommandExecutor, EnvProvider, ExecutionError, SignalProbe, TerminationClient, TimeProvider,
};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Runner lifecycle
///
/// `Terminated` is never observed from inside: it is the host going down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Monitoring,
    StoppingWorkers,
    Draining,
    ShuttingDown,
}

impl RunnerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerState::Monitoring => "MONITORING",
            RunnerState::StoppingWorkers => "STOPPING_WORKERS",
            RunnerState::Draining => "DRAINING",
            RunnerState::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loop timings and commands
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Sleep between monitoring polls
    pub sleep_time: Duration,
    /// Sleep between running-process checks after workers were told to stop
    pub sleep_time_during_shutdown: Duration,
    /// Script that tells the workers to stop
    pub stop_workers_command: String,
    /// Used when no termination service is configured
    pub local_shutdown_command: String,
}

impl RunnerSettings {
    pub fn new(stop_workers_command: impl Into<String>) -> Self {
        Self {
            sleep_time: DEFAULT_SLEEP_TIME,
            sleep_time_during_shutdown: DEFAULT_SLEEP_TIME_DURING_SHUTDOWN,
            stop_workers_command: stop_workers_command.into(),
            local_shutdown_command: DEFAULT_LOCAL_SHUTDOWN_COMMAND.to_string(),
        }
    }
}

/// Result of one monitoring cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Neither marker exists yet
    NoSignal,
    /// The working-process census could not run
    CensusFailed,
    /// Readings taken, no condition holds
    Waiting {
        snapshot: SignalSnapshot,
        thresholds: Thresholds,
    },
    /// Stop sequence must start
    Triggered(TriggerReason),
}

/// What the runner did before handing the host over to shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub trigger: TriggerReason,
    pub errors_present: bool,
    pub action: ShutdownAction,
    /// Failure of the shutdown action, if any (not retried)
    pub action_error: Option<ExecutionError>,
}

/// Runner watches worker activity and powers the host off when idle
pub struct Runner {
    specification: ShutdownSpecification,
    settings: RunnerSettings,
    signal_probe: Arc<dyn SignalProbe>,
    command_executor: Arc<dyn CommandExecutor>,
    termination_client: Arc<dyn TerminationClient>,
    env_provider: Arc<dyn EnvProvider>,
    time_provider: Arc<dyn TimeProvider>,
    state: Mutex<RunnerState>,
}

impl Runner {
    /// Create a runner
    ///
    /// # Errors
    /// - AppError::Config if the specification is blank
    /// - AppError::Domain if it does not parse
    pub fn new(
        specification: &str,
        settings: RunnerSettings,
        signal_probe: Arc<dyn SignalProbe>,
        command_executor: Arc<dyn CommandExecutor>,
        termination_client: Arc<dyn TerminationClient>,
        env_provider: Arc<dyn EnvProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        if specification.trim().is_empty() {
            return Err(AppError::Config(
                "Must specify non-empty self_shutdown_specification".to_string(),
            ));
        }
        let specification = ShutdownSpecification::parse(specification)?;

        Ok(Self {
            specification,
            settings,
            signal_probe,
            command_executor,
            termination_client,
            env_provider,
            time_provider,
            state: Mutex::new(RunnerState::Monitoring),
        })
    }

    pub fn specification(&self) -> &ShutdownSpecification {
        &self.specification
    }

    /// Current lifecycle state
    pub fn state(&self) -> RunnerState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Thresholds in force right now
    pub fn current_thresholds(&self) -> Thresholds {
        self.specification
            .thresholds(&self.time_provider.now_local())
    }

    /// Poll until the host should go down, then stop workers and shut down
    ///
    /// Returns once the shutdown action has been issued. The drain wait has
    /// no upper bound.
    pub async fn run(&self) -> ShutdownReport {
        info!(
            specification = %self.specification,
            sleep_secs = self.settings.sleep_time.as_secs(),
            "Self-shutdown monitor started"
        );

        loop {
            if let PollOutcome::Triggered(trigger) = self.poll_once().await {
                return self.stop_and_shutdown(trigger).await;
            }
            sleep(self.settings.sleep_time).await;
        }
    }

    /// Run one monitoring cycle
    pub async fn poll_once(&self) -> PollOutcome {
        let now = self.time_provider.now();

        let time_since_last_completion =
            self.signal_probe.time_since_last_completion(now).await;
        let time_since_workers_started =
            self.signal_probe.time_since_workers_started(now).await;

        if time_since_last_completion.is_none() && time_since_workers_started.is_none() {
            info!("No time check available yet. Probably workers have not started yet");
            return PollOutcome::NoSignal;
        }

        let thresholds = self.current_thresholds();

        let num_processes_working = match self.signal_probe.num_processes_working().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Working-process census failed, skipping this check");
                return PollOutcome::CensusFailed;
            }
        };

        let snapshot = SignalSnapshot {
            time_since_workers_started,
            time_since_last_completion,
            num_processes_working,
        };

        info!(
            working = num_processes_working,
            postwork_secs = ?time_since_last_completion,
            postwork_threshold = ?thresholds.postwork,
            prework_secs = ?time_since_workers_started,
            prework_threshold = ?thresholds.prework,
            elapsed_threshold = ?thresholds.elapsed,
            "check"
        );

        match evaluate(&snapshot, &thresholds) {
            Some(trigger) => PollOutcome::Triggered(trigger),
            None => PollOutcome::Waiting {
                snapshot,
                thresholds,
            },
        }
    }

    fn enter(&self, state: RunnerState) {
        let previous = std::mem::replace(
            &mut *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
            state,
        );
        info!(from = %previous, to = %state, "Runner state changed");
    }

    async fn stop_and_shutdown(&self, trigger: TriggerReason) -> ShutdownReport {
        self.enter(RunnerState::StoppingWorkers);
        info!(
            command = %self.settings.stop_workers_command,
            trigger = %trigger,
            "Stopping workers"
        );
        // Fire and forget: the drain below is what tells us they stopped
        if let Err(e) = self
            .command_executor
            .run(&self.settings.stop_workers_command)
            .await
        {
            warn!(error = %e, "Stop-workers command failed");
        }

        self.enter(RunnerState::Draining);
        self.wait_for_drain().await;

        let errors_present = self.signal_probe.has_error_marker().await;
        if errors_present {
            warn!("Errors were present -- but permitting shutdown");
        }

        self.enter(RunnerState::ShuttingDown);
        let action = ShutdownAction::select(
            self.env_provider.as_ref(),
            &self.settings.local_shutdown_command,
        );
        info!(action = %action, "Initiating shutdown");

        let action_error = match action
            .execute(
                self.command_executor.as_ref(),
                self.termination_client.as_ref(),
            )
            .await
        {
            Ok(()) => None,
            Err(e) => {
                error!(error = %e, action = %action, "Shutdown action failed");
                Some(e)
            }
        };

        ShutdownReport {
            trigger,
            errors_present,
            action,
            action_error,
        }
    }

    async fn wait_for_drain(&self) {
        info!("Waiting for processes to be done");
        loop {
            match self.signal_probe.num_processes_running().await {
                Ok(0) => break,
                Ok(running) => debug!(running, "Worker processes still running"),
                Err(e) => warn!(error = %e, "Running-process census failed, still waiting"),
            }
            sleep(self.settings.sleep_time_during_shutdown).await;
        }
        info!("All worker processes are down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;
    use crate::port::command_executor::mocks::MockCommandExecutor;
    use crate::port::env_provider::mocks::MockEnvProvider;
    use crate::port::signal_probe::mocks::MockSignalProbe;
    use crate::port::termination::mocks::MockTerminationClient;
    use crate::port::time_provider::mocks::MockTimeProvider;
    use crate::port::CommandOutput;
    use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, TimeZone, Utc};

    const STOP: &str = "/opt/workers/stop.sh";
    const SHUTDOWN: &str = "sudo shutdown -h now";

    /// 2018-07-25 11:16:00 EDT
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 7, 25, 15, 16, 0).unwrap()
    }

    fn ago(secs: i64) -> DateTime<Utc> {
        now() - ChronoDuration::seconds(secs)
    }

    struct Harness {
        probe: Arc<MockSignalProbe>,
        executor: Arc<MockCommandExecutor>,
        termination: Arc<MockTerminationClient>,
        runner: Runner,
    }

    fn harness_with(
        spec: &str,
        probe: MockSignalProbe,
        env: MockEnvProvider,
        clock: MockTimeProvider,
    ) -> Harness {
        let probe = Arc::new(probe);
        let executor = Arc::new(MockCommandExecutor::new_success());
        let termination = Arc::new(MockTerminationClient::new("i-0123456789"));
        let runner = Runner::new(
            spec,
            RunnerSettings::new(STOP),
            probe.clone(),
            executor.clone(),
            termination.clone(),
            Arc::new(env),
            Arc::new(clock),
        )
        .unwrap();
        Harness {
            probe,
            executor,
            termination,
            runner,
        }
    }

    fn harness(spec: &str, probe: MockSignalProbe) -> Harness {
        harness_with(
            spec,
            probe,
            MockEnvProvider::new(),
            MockTimeProvider::new(now()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_prework_idle_stops_workers_then_shuts_down() {
        let probe = MockSignalProbe::new()
            .with_workers_started_at(ago(12000))
            .with_working(vec![1, 1, 0])
            .with_running(vec![1, 1, 0]);
        let h = harness("idlePreWork:10800+300,idlePostWork:730+10", probe);

        let report = h.runner.run().await;

        assert_eq!(
            report.trigger,
            TriggerReason::PreWorkIdle {
                idle_secs: 12000,
                threshold: 11100
            }
        );
        assert_eq!(h.executor.calls(), vec![STOP.to_string(), SHUTDOWN.to_string()]);
        assert_eq!(h.probe.working_reads(), 3);
        assert_eq!(h.probe.running_reads(), 3);
        assert!(!report.errors_present);
        assert_eq!(report.action_error, None);
        assert_eq!(h.runner.state(), RunnerState::ShuttingDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_workers_keep_host_up() {
        let probe = MockSignalProbe::new()
            .with_workers_started_at(ago(99999))
            .with_working(vec![2]);
        let h = harness("idlePreWork:10+0,idlePostWork:10+0", probe);

        let result = tokio::time::timeout(Duration::from_secs(3600), h.runner.run()).await;

        assert!(result.is_err(), "runner must still be monitoring");
        assert_eq!(h.executor.call_count(), 0);
        assert!(h.probe.working_reads() >= 120);
        assert_eq!(h.runner.state(), RunnerState::Monitoring);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_marker_does_not_block_shutdown() {
        let probe = MockSignalProbe::new()
            .with_workers_started_at(ago(1802))
            .with_last_completion_at(ago(825))
            .with_error_marker()
            .with_working(vec![0])
            .with_running(vec![0]);
        let h = harness("idlePreWork:10800+300,idlePostWork:730+10", probe);

        let report = h.runner.run().await;

        assert!(report.errors_present);
        assert_eq!(
            report.trigger,
            TriggerReason::PostWorkIdle {
                idle_secs: 825,
                threshold: 740
            }
        );
        assert_eq!(h.executor.calls().last().map(String::as_str), Some(SHUTDOWN));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_rule_triggers_despite_recent_completion() {
        let probe = MockSignalProbe::new()
            .with_workers_started_at(ago(12000))
            .with_last_completion_at(ago(10))
            .with_working(vec![0])
            .with_running(vec![0]);
        let h = harness("elapsedPreWork:10800+300,elapsedPostWork:730+10", probe);

        let report = h.runner.run().await;

        assert_eq!(
            report.trigger,
            TriggerReason::Elapsed {
                elapsed_secs: 12000,
                threshold: 11100
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_termination_when_configured() {
        let probe = MockSignalProbe::new()
            .with_workers_started_at(ago(5000))
            .with_working(vec![0])
            .with_running(vec![0]);
        let env = MockEnvProvider::new()
            .with(SHUTDOWN_API_BASE_URL_VAR, "https://ops.example.com")
            .with(SHUTDOWN_API_ENDPOINT_VAR, "terminate");
        let h = harness_with(
            "idlePreWork:100+0,idlePostWork:100+0",
            probe,
            env,
            MockTimeProvider::new(now()),
        );

        let report = h.runner.run().await;

        assert_eq!(
            report.action,
            ShutdownAction::Remote {
                url: "https://ops.example.com/terminate".to_string()
            }
        );
        assert_eq!(
            h.termination.requests(),
            vec![(
                "https://ops.example.com/terminate".to_string(),
                "i-0123456789".to_string()
            )]
        );
        assert_eq!(h.executor.calls(), vec![STOP.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_running_processes() {
        let probe = MockSignalProbe::new()
            .with_workers_started_at(ago(5000))
            .with_working(vec![0])
            .with_running(vec![3, 2, 2, 1, 0]);
        let h = harness("idlePreWork:100+0,idlePostWork:100+0", probe);
        let started = tokio::time::Instant::now();

        h.runner.run().await;

        assert_eq!(h.probe.running_reads(), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_stop_and_shutdown_commands_are_not_retried() {
        let probe = MockSignalProbe::new()
            .with_workers_started_at(ago(5000))
            .with_working(vec![0])
            .with_running(vec![0]);
        let probe = Arc::new(probe);
        let executor = Arc::new(MockCommandExecutor::new_fail("no sudo"));
        let runner = Runner::new(
            "idlePreWork:100+0,idlePostWork:100+0",
            RunnerSettings::new(STOP),
            probe,
            executor.clone(),
            Arc::new(MockTerminationClient::new("i-1")),
            Arc::new(MockEnvProvider::new()),
            Arc::new(MockTimeProvider::new(now())),
        )
        .unwrap();

        let report = runner.run().await;

        assert_eq!(executor.call_count(), 2);
        assert!(matches!(
            report.action_error,
            Some(ExecutionError::SpawnFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_no_markers_means_no_decision() {
        let h = harness("idlePreWork:1+0,idlePostWork:1+0", MockSignalProbe::new());

        assert_eq!(h.runner.poll_once().await, PollOutcome::NoSignal);
        assert_eq!(h.probe.working_reads(), 0);
    }

    #[tokio::test]
    async fn test_census_failure_skips_cycle() {
        let probe = MockSignalProbe::new()
            .with_workers_started_at(ago(99999))
            .with_failing_working_census("pgrep missing");
        let h = harness("idlePreWork:1+0,idlePostWork:1+0", probe);

        assert_eq!(h.runner.poll_once().await, PollOutcome::CensusFailed);
    }

    #[tokio::test]
    async fn test_time_of_day_selects_window() {
        let spec = "0600-1200::idlePreWork:10800+10,idlePostWork:800+10;idlePreWork:900+10,idlePostWork:90+10";
        let cdt = FixedOffset::west_opt(5 * 3600).unwrap();

        let morning = cdt.with_ymd_and_hms(2018, 7, 25, 7, 42, 24).unwrap();
        let probe = MockSignalProbe::new()
            .with_workers_started_at(morning.with_timezone(&Utc) - ChronoDuration::seconds(5000))
            .with_working(vec![0]);
        let h = harness_with(spec, probe, MockEnvProvider::new(), MockTimeProvider::at_local(morning));

        assert!(matches!(
            h.runner.poll_once().await,
            PollOutcome::Waiting {
                thresholds: Thresholds {
                    prework: Some(10810),
                    postwork: Some(810),
                    elapsed: Some(10810)
                },
                ..
            }
        ));

        let night = cdt.with_ymd_and_hms(2018, 7, 25, 2, 42, 24).unwrap();
        let probe = MockSignalProbe::new()
            .with_workers_started_at(night.with_timezone(&Utc) - ChronoDuration::seconds(5000))
            .with_working(vec![0]);
        let h = harness_with(spec, probe, MockEnvProvider::new(), MockTimeProvider::at_local(night));

        assert_eq!(
            h.runner.poll_once().await,
            PollOutcome::Triggered(TriggerReason::PreWorkIdle {
                idle_secs: 5000,
                threshold: 910
            })
        );
    }

    #[test]
    fn test_malformed_specification_fails_construction() {
        let probe = Arc::new(MockSignalProbe::new());
        let result = Runner::new(
            "idlePreWork:800+10",
            RunnerSettings::new(STOP),
            probe.clone(),
            Arc::new(MockCommandExecutor::new(|_| Ok(CommandOutput::default()))),
            Arc::new(MockTerminationClient::new("i-1")),
            Arc::new(MockEnvProvider::new()),
            Arc::new(MockTimeProvider::new(now())),
        );

        assert!(matches!(
            result,
            Err(AppError::Domain(DomainError::SpecificationFormat { .. }))
        ));
        assert_eq!(probe.working_reads(), 0);
    }

    #[test]
    fn test_blank_specification_is_a_config_error() {
        let result = Runner::new(
            "  ",
            RunnerSettings::new(STOP),
            Arc::new(MockSignalProbe::new()),
            Arc::new(MockCommandExecutor::new_success()),
            Arc::new(MockTerminationClient::new("i-1")),
            Arc::new(MockEnvProvider::new()),
            Arc::new(MockTimeProvider::new(now())),
        );

        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
