// Shutdown action selection
// Remote termination when the service is configured, local command otherwise

use super::constants::{SHUTDOWN_API_BASE_URL_VAR, SHUTDOWN_API_ENDPOINT_VAR};
use crate::port::{CommandExecutor, EnvProvider, ExecutionError, TerminationClient};
use std::fmt;
use tracing::info;

/// How the host gets powered off
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownAction {
    /// Ask the termination service to terminate this instance
    Remote { url: String },
    /// Run a local privileged shutdown command
    Local { command: String },
}

impl ShutdownAction {
    /// Pick the action from the environment
    ///
    /// Both `SHUTDOWN_API_BASE_URL` and `SHUTDOWN_API_ENDPOINT` must be set
    /// and non-blank for the remote call; anything else falls back to
    /// `local_command`.
    pub fn select(env: &dyn EnvProvider, local_command: &str) -> Self {
        match (
            env.non_empty(SHUTDOWN_API_BASE_URL_VAR),
            env.non_empty(SHUTDOWN_API_ENDPOINT_VAR),
        ) {
            (Some(base), Some(endpoint)) => ShutdownAction::Remote {
                url: join_url(&base, &endpoint),
            },
            _ => ShutdownAction::Local {
                command: local_command.to_string(),
            },
        }
    }

    /// Carry out the action (best effort, no retry)
    ///
    /// Output of the command or response of the service is not interpreted.
    pub async fn execute(
        &self,
        command_executor: &dyn CommandExecutor,
        termination_client: &dyn TerminationClient,
    ) -> Result<(), ExecutionError> {
        match self {
            ShutdownAction::Remote { url } => {
                let instance_id = termination_client.instance_id().await?;
                info!(url = %url, instance_id = %instance_id, "Requesting remote termination");
                let body = termination_client
                    .request_termination(url, &instance_id)
                    .await?;
                info!(response = %body.trim(), "Termination service answered");
                Ok(())
            }
            ShutdownAction::Local { command } => {
                let output = command_executor.run(command).await?;
                info!(
                    command = %command,
                    exit_code = ?output.exit_code,
                    "Shutdown command issued"
                );
                Ok(())
            }
        }
    }
}

impl fmt::Display for ShutdownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownAction::Remote { url } => write!(f, "remote termination via {url}"),
            ShutdownAction::Local { command } => write!(f, "local command `{command}`"),
        }
    }
}

fn join_url(base: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base.trim().trim_end_matches('/'),
        endpoint.trim().trim_start_matches('/')
    )
}
