// Termination Client Port
// Remote shutdown: instance identity lookup + termination endpoint call

use super::ExecutionError;
use async_trait::async_trait;

/// Client for the remote termination service
#[async_trait]
pub trait TerminationClient: Send + Sync {
    /// The host's own cloud instance identifier
    async fn instance_id(&self) -> Result<String, ExecutionError>;

    /// Ask `url` to terminate `instance_id`, returning the response body
    async fn request_termination(
        &self,
        url: &str,
        instance_id: &str,
    ) -> Result<String, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Mock termination client recording requests
    pub struct MockTerminationClient {
        instance_id: Result<String, ExecutionError>,
        requests: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl MockTerminationClient {
        pub fn new(instance_id: impl Into<String>) -> Self {
            Self {
                instance_id: Ok(instance_id.into()),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Instance metadata is unreachable
        pub fn new_unreachable() -> Self {
            Self {
                instance_id: Err(ExecutionError::Metadata("unreachable".to_string())),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// `(url, instance_id)` of every termination request
        pub fn requests(&self) -> Vec<(String, String)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TerminationClient for MockTerminationClient {
        async fn instance_id(&self) -> Result<String, ExecutionError> {
            self.instance_id.clone()
        }

        async fn request_termination(
            &self,
            url: &str,
            instance_id: &str,
        ) -> Result<String, ExecutionError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), instance_id.to_string()));
            Ok("terminating".to_string())
        }
    }
}
