// Command Executor Port
// Abstraction over shell-outs (process census, stop-workers script, local shutdown)

use async_trait::async_trait;
use thiserror::Error;

/// Captured result of a command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// First line of stdout read as a count (unparsable → 0)
    pub fn first_line_count(&self) -> u32 {
        self.stdout
            .lines()
            .next()
            .and_then(|line| line.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Command timeout after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Instance metadata lookup failed: {0}")]
    Metadata(String),
}

/// Command Executor trait
///
/// Implementations:
/// - ShellCommandExecutor: runs the command line through `sh -c`
///
/// A non-zero exit status is not an error: the output is returned and the
/// caller decides. `pgrep -c` for example exits 1 when it counts nothing.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command line and capture its output
    ///
    /// # Errors
    /// - ExecutionError::SpawnFailed if the process cannot be started
    /// - ExecutionError::Timeout if the executor enforces a deadline and it passes
    /// - ExecutionError::IoError if its output cannot be collected
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Handler = dyn Fn(&str) -> Result<CommandOutput, ExecutionError> + Send + Sync;

    /// Mock Command Executor recording every command line
    pub struct MockCommandExecutor {
        handler: Arc<Handler>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl MockCommandExecutor {
        pub fn new<F>(handler: F) -> Self
        where
            F: Fn(&str) -> Result<CommandOutput, ExecutionError> + Send + Sync + 'static,
        {
            Self {
                handler: Arc::new(handler),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Every command succeeds with empty output
        pub fn new_success() -> Self {
            Self::new(|_| Ok(CommandOutput::from_stdout("")))
        }

        /// Every command fails to spawn
        pub fn new_fail(message: impl Into<String>) -> Self {
            let message = message.into();
            Self::new(move |_| Err(ExecutionError::SpawnFailed(message.clone())))
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CommandExecutor for MockCommandExecutor {
        async fn run(&self, command: &str) -> Result<CommandOutput, ExecutionError> {
            self.calls.lock().unwrap().push(command.to_string());
            (self.handler)(command)
        }
    }
}
