pub mod auth;
pub mod config;
pub mod error;
pub mod jira;
pub mod resource;
pub mod retry;
pub mod server;
pub mod summarize;

pub use error::{Error, Result};
