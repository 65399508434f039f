// Port Layer - Interfaces for external dependencies

pub mod command_executor;
pub mod env_provider; // For deterministic testing
pub mod signal_probe;
pub mod termination;
pub mod time_provider;

// Re-exports
pub use command_executor::{CommandExecutor, CommandOutput, ExecutionError};
pub use env_provider::EnvProvider;
pub use signal_probe::SignalProbe;
pub use termination::TerminationClient;
pub use time_provider::TimeProvider;
