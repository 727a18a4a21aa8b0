pub mod client;
pub mod types;

pub use client::{create_with_subtasks, IssueTracker, JiraClient};
pub use types::{NewIssue, SubtaskOutcome};
