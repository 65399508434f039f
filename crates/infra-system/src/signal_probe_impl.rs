// Signal probe implementation
// reason: marker files on disk + process census
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::census::ProcessCensus;
use crate::timestamp::{ErrorMarker, TimestampSource};
use idlestop_core::port::{CommandExecutor, ExecutionError, SignalProbe};

/// Reads worker signals from marker files and process censuses
///
/// Nothing is cached: every call goes back to disk or the process table.
pub struct FileSignalProbe {
    workers_started: TimestampSource,
    last_completion: TimestampSource,
    error_marker: ErrorMarker,
    running: ProcessCensus,
    working: ProcessCensus,
    executor: Arc<dyn CommandExecutor>,
}

impl FileSignalProbe {
    pub fn new(
        workers_started: TimestampSource,
        last_completion: TimestampSource,
        error_marker: ErrorMarker,
        running: ProcessCensus,
        working: ProcessCensus,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            workers_started,
            last_completion,
            error_marker,
            running,
            working,
            executor,
        }
    }

    fn seconds_since(source: &TimestampSource, now: DateTime<Utc>) -> Option<i64> {
        let at = source.read_logged()?;
        let seconds = (now - at).num_seconds();
        debug!(path = %source.path().display(), seconds, "Marker age");
        Some(seconds)
    }
}

#[async_trait]
impl SignalProbe for FileSignalProbe {
    async fn time_since_workers_started(&self, now: DateTime<Utc>) -> Option<i64> {
        Self::seconds_since(&self.workers_started, now)
    }

    async fn time_since_last_completion(&self, now: DateTime<Utc>) -> Option<i64> {
        Self::seconds_since(&self.last_completion, now)
    }

    async fn has_error_marker(&self) -> bool {
        self.error_marker.is_present()
    }

    async fn num_processes_running(&self) -> Result<u32, ExecutionError> {
        let count = self.running.count(self.executor.as_ref()).await?;
        debug!(census = %self.running.describe(), count, "Running processes");
        Ok(count)
    }

    async fn num_processes_working(&self) -> Result<u32, ExecutionError> {
        let count = self.working.count(self.executor.as_ref()).await?;
        debug!(census = %self.working.describe(), count, "Working processes");
        Ok(count)
    }
}
