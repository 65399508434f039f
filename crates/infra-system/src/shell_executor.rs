// Shell command executor
// reason: async-trait, tokio for async process management
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use idlestop_core::port::command_executor::{CommandExecutor, CommandOutput, ExecutionError};

const SHELL: &str = "sh";

/// Runs command lines through `sh -c`, capturing stdout and stderr
///
/// The child inherits the monitor's environment: stop scripts and `sudo`
/// need `PATH` and friends.
#[derive(Debug, Clone, Default)]
pub struct ShellCommandExecutor {
    timeout: Option<Duration>,
}

impl ShellCommandExecutor {
    /// Executor without a deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor that abandons commands running longer than `limit`
    ///
    /// # Example
    /// ```ignore
    /// let executor = ShellCommandExecutor::with_timeout(Duration::from_secs(60));
    /// ```
    pub fn with_timeout(limit: Duration) -> Self {
        Self {
            timeout: Some(limit),
        }
    }

    /// Spawn child process and wait for output
    async fn spawn_and_wait(&self, command: &str) -> Result<std::process::Output, ExecutionError> {
        let child = Command::new(SHELL)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(e.to_string()))?;

        match self.timeout {
            Some(limit) => match timeout(limit, child.wait_with_output()).await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(ExecutionError::IoError(e.to_string())),
                Err(_) => Err(ExecutionError::Timeout(limit.as_millis() as u64)),
            },
            None => child
                .wait_with_output()
                .await
                .map_err(|e| ExecutionError::IoError(e.to_string())),
        }
    }
}

#[async_trait]
impl CommandExecutor for ShellCommandExecutor {
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecutionError> {
        let start = Instant::now();
        debug!(command = %command, "Running command");

        let output = self.spawn_and_wait(command).await?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        info!(
            command = %command,
            duration_ms = start.elapsed().as_millis() as u64,
            exit_code = ?result.exit_code,
            "Command completed"
        );

        Ok(result)
    }
}

/// Quote `value` for a POSIX shell command line
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
