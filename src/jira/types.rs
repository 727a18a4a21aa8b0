use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_ISSUE_TYPE: &str = "Task";
pub const SUBTASK_ISSUE_TYPE: &str = "Sub-task";

/// Caller-supplied issue content, before it is shaped into a JIRA payload
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NewIssue {
    pub summary: String,
    pub description: String,
    #[serde(default = "default_issue_type")]
    pub issue_type: String,
    #[serde(default)]
    pub parent_key: Option<String>,
}

fn default_issue_type() -> String {
    DEFAULT_ISSUE_TYPE.to_string()
}

impl NewIssue {
    pub fn new(summary: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            description: description.into(),
            issue_type: default_issue_type(),
            parent_key: None,
        }
    }

    pub fn with_issue_type(mut self, issue_type: impl Into<String>) -> Self {
        self.issue_type = issue_type.into();
        self
    }

    pub fn subtask_of(mut self, parent_key: impl Into<String>) -> Self {
        self.issue_type = SUBTASK_ISSUE_TYPE.to_string();
        self.parent_key = Some(parent_key.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.summary.trim().is_empty() {
            return Err(Error::Validation("Issue summary is required".to_string()));
        }
        if self.description.trim().is_empty() {
            return Err(Error::Validation("Issue description is required".to_string()));
        }
        if self.issue_type.trim().is_empty() {
            return Err(Error::Validation("Issue type is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct CreateIssueRequest {
    pub fields: IssueFields,
}

#[derive(Debug, Serialize)]
pub struct IssueFields {
    pub project: KeyRef,
    pub summary: String,
    pub description: AdfDocument,
    pub issuetype: NameRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<KeyRef>,
}

#[derive(Debug, Serialize)]
pub struct KeyRef {
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct NameRef {
    pub name: String,
}

impl CreateIssueRequest {
    pub fn new(project_key: &str, issue: &NewIssue) -> Self {
        Self {
            fields: IssueFields {
                project: KeyRef {
                    key: project_key.to_string(),
                },
                summary: issue.summary.trim().to_string(),
                description: AdfDocument::from_text(&issue.description),
                issuetype: NameRef {
                    name: issue.issue_type.clone(),
                },
                parent: issue.parent_key.as_ref().map(|key| KeyRef { key: key.clone() }),
            },
        }
    }
}

/// Atlassian Document Format body, as required by the v3 REST API
#[derive(Debug, Serialize)]
pub struct AdfDocument {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub version: u32,
    pub content: Vec<AdfParagraph>,
}

#[derive(Debug, Serialize)]
pub struct AdfParagraph {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub content: Vec<AdfText>,
}

#[derive(Debug, Serialize)]
pub struct AdfText {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl AdfDocument {
    /// One paragraph per blank-line separated block. ADF rejects empty text
    /// nodes, so blank blocks are dropped.
    pub fn from_text(text: &str) -> Self {
        let content = text
            .split("\n\n")
            .map(str::trim)
            .filter(|block| !block.is_empty())
            .map(|block| AdfParagraph {
                kind: "paragraph",
                content: vec![AdfText {
                    kind: "text",
                    text: block.to_string(),
                }],
            })
            .collect();

        Self {
            kind: "doc",
            version: 1,
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateIssueResponse {
    pub key: String,
    #[serde(default)]
    pub id: Option<String>,
}

/// Result of creating a parent issue and its subtasks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtaskOutcome {
    pub parent_key: String,
    pub created: Vec<String>,
    pub failed: Vec<String>,
}
