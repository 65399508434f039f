// HTTP termination client
// reason: reqwest for the termination service and the instance metadata service
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, warn};

use idlestop_core::port::{ExecutionError, TerminationClient};

/// Instance metadata service root
pub const DEFAULT_METADATA_BASE_URL: &str = "http://169.254.169.254/latest";

const METADATA_TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const METADATA_TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const METADATA_TOKEN_TTL_SECS: &str = "21600";
const METADATA_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Looks up the instance id and calls the termination endpoint
pub struct HttpTerminationClient {
    client: Client,
    metadata_base_url: String,
}

impl HttpTerminationClient {
    /// # Errors
    /// ExecutionError::Http if the HTTP client cannot be built
    pub fn new() -> Result<Self, ExecutionError> {
        Self::with_metadata_base_url(DEFAULT_METADATA_BASE_URL)
    }

    pub fn with_metadata_base_url(base_url: impl Into<String>) -> Result<Self, ExecutionError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExecutionError::Http(e.to_string()))?;
        Ok(Self {
            client,
            metadata_base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// IMDSv2 session token, `None` if the service only speaks IMDSv1
    async fn metadata_token(&self) -> Option<String> {
        let url = format!("{}/api/token", self.metadata_base_url);
        let response = self
            .client
            .put(&url)
            .header(METADATA_TOKEN_TTL_HEADER, METADATA_TOKEN_TTL_SECS)
            .timeout(METADATA_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => resp.text().await.ok(),
            Ok(resp) => {
                debug!(status = %resp.status(), "No metadata token, falling back to IMDSv1");
                None
            }
            Err(e) => {
                debug!(error = %e, "Metadata token request failed, falling back to IMDSv1");
                None
            }
        }
    }
}

#[async_trait]
impl TerminationClient for HttpTerminationClient {
    async fn instance_id(&self) -> Result<String, ExecutionError> {
        let token = self.metadata_token().await;
        let url = format!("{}/meta-data/instance-id", self.metadata_base_url);

        let mut request = self.client.get(&url).timeout(METADATA_TIMEOUT);
        if let Some(token) = &token {
            request = request.header(METADATA_TOKEN_HEADER, token.trim());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExecutionError::Metadata(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ExecutionError::Metadata(format!(
                "{url} answered {}",
                response.status()
            )));
        }

        let id = response
            .text()
            .await
            .map_err(|e| ExecutionError::Metadata(e.to_string()))?
            .trim()
            .to_string();
        if id.is_empty() {
            return Err(ExecutionError::Metadata("empty instance id".to_string()));
        }
        Ok(id)
    }

    async fn request_termination(
        &self,
        url: &str,
        instance_id: &str,
    ) -> Result<String, ExecutionError> {
        let mut target = Url::parse(url).map_err(|e| ExecutionError::Http(format!("{url}: {e}")))?;
        target
            .query_pairs_mut()
            .append_pair("instance_id", instance_id);

        let response = self
            .client
            .post(target)
            .send()
            .await
            .map_err(|e| ExecutionError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExecutionError::Http(e.to_string()))?;
        if !status.is_success() {
            warn!(status = %status, body = %body.trim(), "Termination service refused");
            return Err(ExecutionError::Http(format!("status {status}")));
        }
        Ok(body)
    }
}
