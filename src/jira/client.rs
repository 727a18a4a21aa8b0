use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::types::{CreateIssueRequest, CreateIssueResponse, NewIssue, SubtaskOutcome};
use crate::config::JiraConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Create one issue. `Ok(None)` means the tracker answered with anything
    /// other than 201 Created.
    async fn create_issue(&self, issue: &NewIssue) -> Result<Option<String>>;
}

pub struct JiraClient {
    config: JiraConfig,
    http_client: reqwest::Client,
}

impl JiraClient {
    pub fn new(config: JiraConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn issue_url(&self) -> String {
        format!("{}/rest/api/3/issue", self.config.base_url())
    }
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn create_issue(&self, issue: &NewIssue) -> Result<Option<String>> {
        issue.validate()?;

        let payload = CreateIssueRequest::new(&self.config.project_key, issue);
        debug!(
            "Creating {} issue in project {}",
            issue.issue_type, self.config.project_key
        );

        let response = self
            .http_client
            .post(self.issue_url())
            .basic_auth(&self.config.email, Some(&self.config.api_token))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("JIRA request timed out: {}", e))
                } else {
                    Error::ExternalCall(format!("Failed to reach JIRA: {}", e))
                }
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::CREATED {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            warn!("JIRA issue creation failed with status {}: {}", status, body);
            return Ok(None);
        }

        let created: CreateIssueResponse = response
            .json()
            .await
            .map_err(|e| Error::ExternalCall(format!("Failed to parse JIRA response: {}", e)))?;

        info!("Created JIRA issue {}", created.key);
        Ok(Some(created.key))
    }
}

/// Create `parent`, then one subtask per `(summary, description)` pair under it.
///
/// Fails only when the parent cannot be created; subtask failures are
/// collected in [`SubtaskOutcome::failed`].
pub async fn create_with_subtasks(
    tracker: &dyn IssueTracker,
    parent: &NewIssue,
    subtasks: &[(String, String)],
) -> Result<SubtaskOutcome> {
    for (summary, description) in subtasks {
        NewIssue::new(summary.as_str(), description.as_str()).validate()?;
    }

    let parent_key = tracker
        .create_issue(parent)
        .await?
        .ok_or_else(|| Error::ExternalCall("Parent issue was not created".to_string()))?;

    let mut outcome = SubtaskOutcome {
        parent_key: parent_key.clone(),
        created: Vec::new(),
        failed: Vec::new(),
    };

    for (summary, description) in subtasks {
        let subtask = NewIssue::new(summary.as_str(), description.as_str()).subtask_of(&parent_key);
        match tracker.create_issue(&subtask).await {
            Ok(Some(key)) => outcome.created.push(key),
            Ok(None) => outcome.failed.push(summary.clone()),
            Err(e) => {
                warn!("Subtask '{}' failed: {}", summary, e);
                outcome.failed.push(summary.clone());
            }
        }
    }

    Ok(outcome)
}
