// idlestop Infrastructure - System Adapters
// Implements: CommandExecutor, SignalProbe, TerminationClient

pub mod census;
pub mod monitor_process;
pub mod notifier;
pub mod shell_executor;
pub mod signal_probe_impl;
pub mod termination_client;
pub mod timestamp;

pub use census::ProcessCensus;
pub use monitor_process::{find_monitor_pids, is_monitor_command, signal_monitors, SignalReport};
pub use notifier::Notifier;
pub use shell_executor::ShellCommandExecutor;
pub use signal_probe_impl::FileSignalProbe;
pub use termination_client::HttpTerminationClient;
pub use timestamp::{ErrorMarker, MarkerError, TimestampSource};
