pub mod oauth2;
pub mod store;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub use oauth2::OAuth2Client;
pub use store::{FileTokenStore, PersistedToken, TokenStore};

/// Trait for authentication providers that can fetch access tokens
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Return a usable access token, fetching a new one if needed
    async fn get_token(&self) -> Result<String>;

    /// Forget any cached token, e.g. after a downstream 401
    async fn invalidate(&self) {}
}

/// Access token with the absolute instant after which it must not be used
#[derive(Clone, PartialEq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CachedToken {
    /// True while `now + buffer` is still strictly before expiry.
    pub fn is_fresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        chrono::Duration::from_std(buffer)
            .ok()
            .and_then(|buffer| now.checked_add_signed(buffer))
            .map_or(false, |deadline| deadline < self.expires_at)
    }
}
