use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::AuthProvider;
use crate::error::{Error, Result};

/// Fetches JSON from an API protected by the cached bearer token
#[derive(Clone)]
pub struct ResourceClient {
    auth: Arc<dyn AuthProvider>,
    http_client: reqwest::Client,
}

impl ResourceClient {
    pub fn new(auth: Arc<dyn AuthProvider>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { auth, http_client })
    }

    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let token = self.auth.get_token().await?;
        debug!("Fetching protected resource {}", url);

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("Resource request timed out: {}", e))
                } else {
                    Error::ExternalCall(format!("Failed to reach {}: {}", url, e))
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // The provider revoked or rotated the token before its expiry.
            warn!("Resource rejected bearer token, dropping cached token");
            self.auth.invalidate().await;
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(Error::ExternalCall(format!(
                "Resource request failed with status {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::ExternalCall(format!("Failed to parse resource response: {}", e)))
    }
}
