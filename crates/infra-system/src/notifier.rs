// Notifier - workers stamp marker files through this
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::timestamp::format_marker_timestamp;
use idlestop_core::port::TimeProvider;

/// Writes the workers-started, last-completion and last-error markers
pub struct Notifier {
    workers_start_file: PathBuf,
    last_complete_file: PathBuf,
    last_error_file: PathBuf,
    time_provider: Arc<dyn TimeProvider>,
}

impl Notifier {
    pub fn new(
        workers_start_file: impl Into<PathBuf>,
        last_complete_file: impl Into<PathBuf>,
        last_error_file: impl Into<PathBuf>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            workers_start_file: workers_start_file.into(),
            last_complete_file: last_complete_file.into(),
            last_error_file: last_error_file.into(),
            time_provider,
        }
    }

    pub fn notify_worker_start(&self) -> io::Result<()> {
        self.stamp(&self.workers_start_file)
    }

    pub fn notify_complete(&self) -> io::Result<()> {
        self.stamp(&self.last_complete_file)
    }

    pub fn notify_error(&self) -> io::Result<()> {
        self.stamp(&self.last_error_file)
    }

    /// Remove all three markers; missing ones are fine
    pub fn clear(&self) -> io::Result<()> {
        for path in [
            &self.workers_start_file,
            &self.last_complete_file,
            &self.last_error_file,
        ] {
            match fs::remove_file(path) {
                Ok(()) => info!(path = %path.display(), "Marker removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn stamp(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let stamp = format_marker_timestamp(self.time_provider.now());
        fs::write(path, &stamp)?;
        info!(path = %path.display(), at = %stamp, "Marker written");
        Ok(())
    }
}
