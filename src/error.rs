use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Token request rejected with status {status}: {body}")]
    AuthRejected { status: u16, body: String },

    #[error("External call failed: {0}")]
    ExternalCall(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse config: {0}")]
    Serialization(#[from] toml::de::Error),
}

impl Error {
    /// Deadline-exceeded conditions are the only ones worth retrying.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::AuthRejected { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
