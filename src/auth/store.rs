use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

use super::CachedToken;
use crate::error::Result;

/// On-disk token record.
///
/// `expiry` is serialized as an RFC 3339 UTC timestamp. Provider fields other
/// than the access token (`token_type`, `scope`, ...) are kept as-is.
#[derive(Clone, PartialEq, Deserialize, Serialize)]
pub struct PersistedToken {
    pub access_token: String,
    pub expiry: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl std::fmt::Debug for PersistedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Provider extras may carry further credentials, so only their names are shown.
        f.debug_struct("PersistedToken")
            .field("access_token", &"[REDACTED]")
            .field("expiry", &self.expiry)
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PersistedToken {
    pub fn to_cached(&self) -> CachedToken {
        CachedToken {
            access_token: self.access_token.clone(),
            expires_at: self.expiry,
        }
    }
}

/// Durable storage for a single token record
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Returns `Ok(None)` when nothing has been stored yet.
    async fn load(&self) -> Result<Option<PersistedToken>>;
    async fn save(&self, token: &PersistedToken) -> Result<()>;
}

/// Stores the token as a JSON file, replacing it atomically on every save.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "token.json".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<PersistedToken>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let token: PersistedToken = serde_json::from_str(&contents)?;
        debug!("Loaded persisted token from {:?}", self.path);
        Ok(Some(token))
    }

    async fn save(&self, token: &PersistedToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let contents = serde_json::to_vec_pretty(token)?;
        let temp_path = self.temp_path();

        // Readers only ever see the old file or the complete new one.
        fs::write(&temp_path, &contents).await?;
        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!("Persisted token to {:?}", self.path);
        Ok(())
    }
}
