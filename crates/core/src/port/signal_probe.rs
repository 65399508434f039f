// Signal probe port
// reason: async-trait, adapters shell out or touch the filesystem
use super::ExecutionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Signal probe port for idle/elapsed and process-activity readings
///
/// Every call reads its source afresh; nothing is cached across poll cycles.
#[async_trait]
pub trait SignalProbe: Send + Sync {
    /// Seconds since the workers-started marker, relative to `now`
    ///
    /// `None` if the marker is missing or unparsable (adapters log why)
    async fn time_since_workers_started(&self, now: DateTime<Utc>) -> Option<i64>;

    /// Seconds since the last-completion marker, relative to `now`
    async fn time_since_last_completion(&self, now: DateTime<Utc>) -> Option<i64>;

    /// True if an error marker is present
    async fn has_error_marker(&self) -> bool;

    /// Number of worker processes alive
    ///
    /// # Errors
    /// ExecutionError if the census itself could not run
    async fn num_processes_running(&self) -> Result<u32, ExecutionError>;

    /// Number of worker processes currently doing work
    async fn num_processes_working(&self) -> Result<u32, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays a sequence of counts; the last one repeats forever
    #[derive(Debug, Clone)]
    struct CountScript {
        remaining: VecDeque<Result<u32, ExecutionError>>,
        last: Result<u32, ExecutionError>,
        reads: usize,
    }

    impl CountScript {
        fn constant(count: u32) -> Self {
            Self {
                remaining: VecDeque::new(),
                last: Ok(count),
                reads: 0,
            }
        }

        fn sequence(counts: Vec<u32>) -> Self {
            let last = counts.last().copied().unwrap_or(0);
            Self {
                remaining: counts.into_iter().map(Ok).collect(),
                last: Ok(last),
                reads: 0,
            }
        }

        fn next(&mut self) -> Result<u32, ExecutionError> {
            self.reads += 1;
            self.remaining.pop_front().unwrap_or_else(|| self.last.clone())
        }
    }

    #[derive(Debug, Clone)]
    struct ProbeState {
        workers_started_at: Option<DateTime<Utc>>,
        last_completion_at: Option<DateTime<Utc>>,
        error_marker: bool,
        running: CountScript,
        working: CountScript,
    }

    /// Mock SignalProbe for testing
    pub struct MockSignalProbe {
        state: Arc<Mutex<ProbeState>>,
    }

    impl MockSignalProbe {
        /// No markers, one worker running and busy
        pub fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(ProbeState {
                    workers_started_at: None,
                    last_completion_at: None,
                    error_marker: false,
                    running: CountScript::constant(1),
                    working: CountScript::constant(1),
                })),
            }
        }

        pub fn with_workers_started_at(self, at: DateTime<Utc>) -> Self {
            self.state.lock().unwrap().workers_started_at = Some(at);
            self
        }

        pub fn with_last_completion_at(self, at: DateTime<Utc>) -> Self {
            self.state.lock().unwrap().last_completion_at = Some(at);
            self
        }

        pub fn with_error_marker(self) -> Self {
            self.state.lock().unwrap().error_marker = true;
            self
        }

        /// Working counts returned by successive reads
        pub fn with_working(self, counts: Vec<u32>) -> Self {
            self.state.lock().unwrap().working = CountScript::sequence(counts);
            self
        }

        /// Running counts returned by successive reads
        pub fn with_running(self, counts: Vec<u32>) -> Self {
            self.state.lock().unwrap().running = CountScript::sequence(counts);
            self
        }

        /// Every working census fails
        pub fn with_failing_working_census(self, message: impl Into<String>) -> Self {
            let mut state = self.state.lock().unwrap();
            state.working.remaining.clear();
            state.working.last = Err(ExecutionError::SpawnFailed(message.into()));
            drop(state);
            self
        }

        pub fn working_reads(&self) -> usize {
            self.state.lock().unwrap().working.reads
        }

        pub fn running_reads(&self) -> usize {
            self.state.lock().unwrap().running.reads
        }
    }

    impl Default for MockSignalProbe {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl SignalProbe for MockSignalProbe {
        async fn time_since_workers_started(&self, now: DateTime<Utc>) -> Option<i64> {
            let at = self.state.lock().unwrap().workers_started_at?;
            Some((now - at).num_seconds())
        }

        async fn time_since_last_completion(&self, now: DateTime<Utc>) -> Option<i64> {
            let at = self.state.lock().unwrap().last_completion_at?;
            Some((now - at).num_seconds())
        }

        async fn has_error_marker(&self) -> bool {
            self.state.lock().unwrap().error_marker
        }

        async fn num_processes_running(&self) -> Result<u32, ExecutionError> {
            self.state.lock().unwrap().running.next()
        }

        async fn num_processes_working(&self) -> Result<u32, ExecutionError> {
            self.state.lock().unwrap().working.next()
        }
    }
}
