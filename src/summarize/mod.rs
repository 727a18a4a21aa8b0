//! Prompt-based summarization through a text-generation API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::GeminiConfig;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

const SUMMARY_PROMPT: &str = "Summarize the following text as a short, clear ticket \
description. Keep concrete details such as error messages, versions and steps to \
reproduce.\n\n";

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Returns `Error::Timeout` when `timeout` elapses before an answer.
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// Client for the Gemini `generateContent` REST endpoint
pub struct GeminiClient {
    config: GeminiConfig,
    http_client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        // Per-request timeouts are set in `generate`.
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let response = self
            .http_client
            .post(self.generate_url())
            .header("x-goog-api-key", &self.config.api_key)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("Text generation exceeded {:?}", timeout))
                } else {
                    Error::ExternalCall(format!("Failed to reach text generation API: {}", e))
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::GATEWAY_TIMEOUT
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            return Err(Error::Timeout(format!(
                "Text generation deadline exceeded (status {})",
                status
            )));
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(Error::ExternalCall(format!(
                "Text generation failed with status {}: {}",
                status, body
            )));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("Text generation exceeded {:?}", timeout))
            } else {
                Error::ExternalCall(format!("Failed to parse text generation response: {}", e))
            }
        })?;

        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(Error::ExternalCall(
                "Text generation returned no content".to_string(),
            ));
        }

        Ok(text)
    }
}

/// Summarizes free text, retrying timed-out generations with backoff.
pub struct Summarizer {
    generator: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Summarizer {
    pub fn new(generator: Arc<dyn TextGenerator>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            generator,
            retry,
            timeout,
        }
    }

    pub fn from_config(config: &GeminiConfig) -> Result<Self> {
        let retry = RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.initial_backoff_ms),
        );
        let timeout = Duration::from_secs(config.timeout_seconds);
        let generator = Arc::new(GeminiClient::new(config.clone())?);
        Ok(Self::new(generator, retry, timeout))
    }

    pub async fn summarize(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::Validation("Text to summarize is required".to_string()));
        }

        let prompt = format!("{}{}", SUMMARY_PROMPT, text.trim());
        let summary = self
            .retry
            .run(
                |attempt| {
                    debug!("Text generation attempt {}", attempt);
                    self.generator.generate(&prompt, self.timeout)
                },
                Error::is_timeout,
            )
            .await?;

        info!("Generated summary ({} chars)", summary.len());
        Ok(summary.trim().to_string())
    }
}
