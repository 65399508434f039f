// Monitor process lookup and signalling (used by `idlestop stop`)
// reason: sysinfo for the process table, nix for signals

use std::path::Path;
use sysinfo::System;
use tracing::{debug, info, warn};

use crate::census::thread_pids;

/// Global options that take their value as the next argument
const OPTIONS_WITH_VALUE: &[&str] = &["-c", "--config-file"];

/// Outcome of one `stop` sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalReport {
    /// Pids that received SIGQUIT
    pub signalled: Vec<u32>,
    pub errors: Vec<String>,
}

/// True if `cmd` runs `binary_name` with the `start` subcommand
///
/// Matches on the program's file name so `/usr/local/bin/idlestop -c x start`
/// counts, while `idlestop stop`, `idlestop notify start` or
/// `vim idlestop.json` do not.
pub fn is_monitor_command(cmd: &[String], binary_name: &str) -> bool {
    let Some(program_at) = cmd.iter().position(|arg| {
        Path::new(arg)
            .file_name()
            .is_some_and(|name| name == binary_name)
    }) else {
        return false;
    };

    let mut args = cmd[program_at + 1..].iter();
    while let Some(arg) = args.next() {
        if OPTIONS_WITH_VALUE.contains(&arg.as_str()) {
            args.next();
        } else if !arg.starts_with('-') {
            return arg == "start";
        }
    }
    false
}

/// Pids of running monitors, excluding the current process
pub fn find_monitor_pids(binary_name: &str) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes();
    let own_pid = sysinfo::get_current_pid().ok();
    let threads = thread_pids(&system);

    let mut pids: Vec<u32> = system
        .processes()
        .iter()
        .filter(|(pid, _)| Some(**pid) != own_pid && !threads.contains(pid))
        .filter(|(_, process)| is_monitor_command(process.cmd(), binary_name))
        .map(|(pid, _)| pid.as_u32())
        .collect();
    pids.sort_unstable();

    debug!(binary = binary_name, pids = ?pids, "Monitor processes found");
    pids
}

/// Send SIGQUIT to every running monitor
pub fn signal_monitors(binary_name: &str) -> SignalReport {
    let mut report = SignalReport::default();
    for pid in find_monitor_pids(binary_name) {
        match send_quit(pid) {
            Ok(()) => {
                info!(pid, "Sent SIGQUIT to monitor");
                report.signalled.push(pid);
            }
            Err(e) => {
                warn!(pid, error = %e, "Could not signal monitor");
                report.errors.push(format!("pid {pid}: {e}"));
            }
        }
    }
    report
}

#[cfg(unix)]
fn send_quit(pid: u32) -> Result<(), String> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|e| e.to_string())?;
    kill(Pid::from_raw(raw), Signal::SIGQUIT).map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn send_quit(_pid: u32) -> Result<(), String> {
    Err("signals not supported on this platform".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_is_monitor_command() {
        assert!(is_monitor_command(&argv("idlestop start"), "idlestop"));
        assert!(is_monitor_command(
            &argv("/usr/local/bin/idlestop -c /etc/idlestop.json start -d"),
            "idlestop"
        ));
        assert!(is_monitor_command(
            &argv("idlestop --config-file=/etc/idlestop.json start"),
            "idlestop"
        ));
        assert!(!is_monitor_command(&argv("idlestop stop"), "idlestop"));
        assert!(!is_monitor_command(&argv("idlestop notify start"), "idlestop"));
        assert!(!is_monitor_command(
            &argv("idlestop -c /etc/idlestop.json notify start"),
            "idlestop"
        ));
        assert!(!is_monitor_command(&argv("idlestop -c start stop"), "idlestop"));
        assert!(!is_monitor_command(&argv("vim idlestop.json start"), "idlestop"));
        assert!(!is_monitor_command(&argv("start idlestop"), "idlestop"));
        assert!(!is_monitor_command(&[], "idlestop"));
    }

    #[test]
    fn test_no_monitor_running() {
        let report = signal_monitors("idlestop-no-such-binary-7f3a");
        assert_eq!(report, SignalReport::default());
    }
}
