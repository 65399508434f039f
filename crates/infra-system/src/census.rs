// Process census - counting worker processes by pattern
// reason: sysinfo for in-process process table scans

use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;
use sysinfo::{Pid, System};
use tracing::debug;

use crate::shell_executor::shell_quote;
use idlestop_core::port::{CommandExecutor, ExecutionError};

/// How worker processes are counted
#[derive(Debug, Clone)]
pub enum ProcessCensus {
    /// `pgrep -f -c '<pattern>'` through the command executor
    Pgrep { pattern: String },
    /// Scan the process table and match full command lines
    ProcessTable { pattern: Regex },
    /// Count directory entries whose file name matches
    MarkerDir { dir: PathBuf, pattern: Regex },
}

impl ProcessCensus {
    /// Count matching processes (or marker entries)
    ///
    /// # Errors
    /// ExecutionError if the census could not run at all
    pub async fn count(&self, executor: &dyn CommandExecutor) -> Result<u32, ExecutionError> {
        match self {
            ProcessCensus::Pgrep { pattern } => {
                let output = executor.run(&pgrep_command(pattern)).await?;
                Ok(output.first_line_count())
            }
            ProcessCensus::ProcessTable { pattern } => {
                let pattern = pattern.clone();
                tokio::task::spawn_blocking(move || count_process_table(&pattern))
                    .await
                    .map_err(|e| ExecutionError::IoError(format!("process scan aborted: {e}")))
            }
            ProcessCensus::MarkerDir { dir, pattern } => count_marker_entries(dir, pattern)
                .map_err(|e| {
                    ExecutionError::IoError(format!("cannot list {}: {e}", dir.display()))
                }),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ProcessCensus::Pgrep { pattern } => format!("pgrep '{pattern}'"),
            ProcessCensus::ProcessTable { pattern } => format!("process table /{pattern}/"),
            ProcessCensus::MarkerDir { dir, pattern } => {
                format!("entries /{pattern}/ in {}", dir.display())
            }
        }
    }
}

pub fn pgrep_command(pattern: &str) -> String {
    format!("pgrep -f -c {}", shell_quote(pattern))
}

/// Thread ids listed in the process table
///
/// On Linux sysinfo reports every thread as its own entry carrying the
/// owner's command line, so one multi-threaded worker would count many times.
pub(crate) fn thread_pids(system: &System) -> HashSet<Pid> {
    system
        .processes()
        .values()
        .filter_map(|process| process.tasks())
        .flatten()
        .copied()
        .collect()
}

/// Count processes whose command line matches, excluding ourselves
fn count_process_table(pattern: &Regex) -> u32 {
    let mut system = System::new();
    system.refresh_processes();
    let own_pid = sysinfo::get_current_pid().ok();
    let threads = thread_pids(&system);

    let count = system
        .processes()
        .iter()
        .filter(|(pid, _)| Some(**pid) != own_pid && !threads.contains(pid))
        .filter(|(_, process)| {
            let cmd = process.cmd();
            if cmd.is_empty() {
                pattern.is_match(process.name())
            } else {
                pattern.is_match(&cmd.join(" "))
            }
        })
        .count();

    debug!(pattern = %pattern, count, "Process table scanned");
    u32::try_from(count).unwrap_or(u32::MAX)
}

fn count_marker_entries(dir: &PathBuf, pattern: &Regex) -> io::Result<u32> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Marker directory absent");
            return Ok(0);
        }
        Err(e) => return Err(e),
    };

    let mut count = 0u32;
    for entry in entries {
        let entry = entry?;
        if pattern.is_match(&entry.file_name().to_string_lossy()) {
            count = count.saturating_add(1);
        }
    }
    Ok(count)
}
