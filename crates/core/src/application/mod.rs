// Application Layer - Use Cases and Decision Loop

pub mod runner;

// Re-exports
pub use runner::{PollOutcome, Runner, RunnerSettings, RunnerState, ShutdownAction, ShutdownReport};
