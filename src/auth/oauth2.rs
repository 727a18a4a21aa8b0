use crate::config::OAuth2ClientConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::store::{PersistedToken, TokenStore};
use super::{AuthProvider, CachedToken};

/// OAuth2 token response from the authorization server
#[derive(Clone, Deserialize, Serialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// OAuth2 client credentials authentication provider.
///
/// Holds one cached token. Reads take a shared lock; a refresh takes the
/// write lock and re-checks the cache first, so concurrent callers that all
/// see a stale token trigger a single exchange.
pub struct OAuth2Client {
    config: OAuth2ClientConfig,
    http_client: reqwest::Client,
    cached_token: RwLock<Option<CachedToken>>,
    store: Option<Arc<dyn TokenStore>>,
    store_loaded: AtomicBool,
}

impl OAuth2Client {
    pub fn new(config: OAuth2ClientConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            cached_token: RwLock::new(None),
            store: None,
            store_loaded: AtomicBool::new(false),
        })
    }

    /// Persist tokens through `store` and seed the cache from it on first use.
    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    async fn cached_if_fresh(&self) -> Option<String> {
        let cache = self.cached_token.read().await;
        cache
            .as_ref()
            .filter(|token| token.is_fresh(Utc::now(), self.config.expiry_buffer))
            .map(|token| token.access_token.clone())
    }

    /// Seed the cache from durable storage, at most once per client.
    async fn load_persisted(&self, cache: &mut Option<CachedToken>) {
        let Some(store) = &self.store else {
            return;
        };
        if self.store_loaded.swap(true, Ordering::SeqCst) {
            return;
        }

        match store.load().await {
            Ok(Some(persisted)) => {
                debug!("Loaded persisted OAuth2 token");
                *cache = Some(persisted.to_cached());
            }
            Ok(None) => debug!("No persisted OAuth2 token found"),
            Err(e) => warn!("Ignoring unreadable persisted token: {}", e),
        }
    }

    /// Fetch a new access token from the OAuth2 authorization server
    async fn fetch_new_token(&self) -> Result<(CachedToken, TokenResponse)> {
        debug!("Fetching new OAuth2 token from {}", self.config.token_url);

        let scope = self.config.scopes.join(" ");
        let mut params = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        // Provider-specific extras such as `audience`
        for (key, value) in &self.config.endpoint_params {
            params.push((key.as_str(), value.as_str()));
        }

        let response = self
            .http_client
            .post(&self.config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("Failed to request OAuth2 token: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(Error::AuthRejected { status, body });
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("Failed to parse OAuth2 token response: {}", e)))?;

        let expires_at = expiry_from_now(token_response.expires_in)?;

        info!(
            "Successfully obtained OAuth2 token (expires in {} seconds)",
            token_response.expires_in
        );

        let cached = CachedToken {
            access_token: token_response.access_token.clone(),
            expires_at,
        };
        Ok((cached, token_response))
    }

    async fn persist(&self, token: &CachedToken, response: TokenResponse) {
        let Some(store) = &self.store else {
            return;
        };

        let mut extra = response.extra;
        extra.insert(
            "expires_in".to_string(),
            serde_json::Value::from(response.expires_in),
        );
        let record = PersistedToken {
            access_token: token.access_token.clone(),
            expiry: token.expires_at,
            extra,
        };

        // The token is already usable from memory.
        if let Err(e) = store.save(&record).await {
            warn!("Failed to persist OAuth2 token: {}", e);
        }
    }
}

/// Absolute expiry for a lifetime of `expires_in` seconds, rejecting values
/// that cannot be represented as a timestamp.
fn expiry_from_now(expires_in: u64) -> Result<DateTime<Utc>> {
    i64::try_from(expires_in)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| Error::Auth(format!("Invalid expires_in in token response: {}", expires_in)))
}

#[async_trait]
impl AuthProvider for OAuth2Client {
    async fn get_token(&self) -> Result<String> {
        if let Some(token) = self.cached_if_fresh().await {
            debug!("Using cached OAuth2 token");
            return Ok(token);
        }

        let mut cache = self.cached_token.write().await;
        self.load_persisted(&mut cache).await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = cache
            .as_ref()
            .filter(|token| token.is_fresh(Utc::now(), self.config.expiry_buffer))
        {
            return Ok(token.access_token.clone());
        }

        debug!("Cached token expired or absent, fetching new token");
        let (new_token, response) = self.fetch_new_token().await?;
        self.persist(&new_token, response).await;

        let access_token = new_token.access_token.clone();
        *cache = Some(new_token);

        Ok(access_token)
    }

    /// Drop the in-memory token so the next call performs an exchange.
    async fn invalidate(&self) {
        let mut cache = self.cached_token.write().await;
        *cache = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::FileTokenStore;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config(token_url: &str) -> OAuth2ClientConfig {
        let mut endpoint_params = HashMap::new();
        endpoint_params.insert("audience".to_string(), "test-audience".to_string());

        OAuth2ClientConfig {
            client_id: "test-client-id".to_string(),
            client_secret: "test-client-secret".to_string(),
            token_url: token_url.to_string(),
            scopes: vec!["openid".to_string(), "profile".to_string(), "email".to_string()],
            expiry_buffer: Duration::from_secs(300),
            timeout: Duration::from_secs(5),
            endpoint_params,
        }
    }

    fn token_body(token: &str, expires_in: u64) -> serde_json::Value {
        json!({
            "access_token": token,
            "token_type": "Bearer",
            "expires_in": expires_in,
            "scope": "openid profile email",
        })
    }

    async fn seed_cache(client: &OAuth2Client, token: &str, expires_in_secs: i64) {
        let mut cache = client.cached_token.write().await;
        *cache = Some(CachedToken {
            access_token: token.to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        });
    }

    #[tokio::test]
    async fn test_oauth2_client_new() {
        let config = create_test_config("https://auth.example.com/token");
        let client = OAuth2Client::new(config).unwrap();
        assert_eq!(client.config.client_id, "test-client-id");
        assert!(client.store.is_none());
    }

    #[tokio::test]
    async fn test_oauth2_fetch_token_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=test-client-id"))
            .and(body_string_contains("client_secret=test-client-secret"))
            .and(body_string_contains("scope=openid+profile+email"))
            .and(body_string_contains("audience=test-audience"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-123", 3600)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = create_test_config(&format!("{}/token", mock_server.uri()));
        let client = OAuth2Client::new(config).unwrap();

        assert_eq!(client.get_token().await.unwrap(), "access-123");
    }

    #[tokio::test]
    async fn test_cache_hit_makes_no_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("unused", 3600)))
            .expect(0)
            .mount(&mock_server)
            .await;

        let config = create_test_config(&format!("{}/token", mock_server.uri()));
        let client = OAuth2Client::new(config).unwrap();
        seed_cache(&client, "warm-token", 3600).await;

        assert_eq!(client.get_token().await.unwrap(), "warm-token");
        assert_eq!(client.get_token().await.unwrap(), "warm-token");
    }

    #[tokio::test]
    async fn test_token_within_buffer_is_refreshed_once() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fresh-token", 3600)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = create_test_config(&format!("{}/token", mock_server.uri()));
        let client = OAuth2Client::new(config).unwrap();
        // Valid for 4 more minutes, but inside the 5 minute buffer
        seed_cache(&client, "stale-token", 240).await;

        assert_eq!(client.get_token().await.unwrap(), "fresh-token");
        assert_eq!(client.get_token().await.unwrap(), "fresh-token");
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("new-token", 3600)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut config = create_test_config(&format!("{}/token", mock_server.uri()));
        config.expiry_buffer = Duration::ZERO;
        let client = OAuth2Client::new(config).unwrap();
        seed_cache(&client, "expired-token", -10).await;

        assert_eq!(client.get_token().await.unwrap(), "new-token");
    }

    #[tokio::test]
    async fn test_zero_buffer_serves_short_lived_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("short-lived", 120)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut config = create_test_config(&format!("{}/token", mock_server.uri()));
        config.expiry_buffer = Duration::ZERO;
        let client = OAuth2Client::new(config).unwrap();

        assert_eq!(client.get_token().await.unwrap(), "short-lived");
        assert_eq!(client.get_token().await.unwrap(), "short-lived");
    }

    #[tokio::test]
    async fn test_short_lived_token_is_refetched_with_buffer() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("short-lived", 120)))
            .expect(2)
            .mount(&mock_server)
            .await;

        let config = create_test_config(&format!("{}/token", mock_server.uri()));
        let client = OAuth2Client::new(config).unwrap();

        client.get_token().await.unwrap();
        client.get_token().await.unwrap();
    }

    #[tokio::test]
    async fn test_oauth2_fetch_token_failure_keeps_previous_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client",
                "error_description": "Invalid client credentials"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = create_test_config(&format!("{}/token", mock_server.uri()));
        let client = OAuth2Client::new(config).unwrap();
        seed_cache(&client, "previous-token", 10).await;

        match client.get_token().await.unwrap_err() {
            Error::AuthRejected { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid_client"));
            }
            other => panic!("Expected AuthRejected, got {:?}", other),
        }

        let cache = client.cached_token.read().await;
        assert_eq!(cache.as_ref().unwrap().access_token, "previous-token");
    }

    #[tokio::test]
    async fn test_network_failure_is_auth_error() {
        // Nothing listens on the discard port
        let config = create_test_config("http://127.0.0.1:9/token");
        let client = OAuth2Client::new(config).unwrap();

        let err = client.get_token().await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn test_malformed_response_is_auth_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "nope"})))
            .mount(&mock_server)
            .await;

        let config = create_test_config(&format!("{}/token", mock_server.uri()));
        let client = OAuth2Client::new(config).unwrap();

        let err = client.get_token().await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse OAuth2 token response"));
    }

    #[tokio::test]
    async fn test_unrepresentable_expires_in_is_auth_error() {
        for expires_in in [10_000_000_000_000u64, u64::MAX] {
            let mock_server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/token"))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(token_body("far-future", expires_in)),
                )
                .mount(&mock_server)
                .await;

            let config = create_test_config(&format!("{}/token", mock_server.uri()));
            let client = Arc::new(OAuth2Client::new(config).unwrap());

            let task_client = Arc::clone(&client);
            let result = tokio::spawn(async move { task_client.get_token().await })
                .await
                .expect("token task must not panic");

            match result.unwrap_err() {
                Error::Auth(msg) => assert!(msg.contains("Invalid expires_in")),
                other => panic!("Expected Auth error, got {:?}", other),
            }
            assert!(client.cached_token.read().await.is_none());
        }
    }

    #[test]
    fn test_expiry_from_now() {
        let before = Utc::now();
        let expiry = expiry_from_now(3600).unwrap();
        assert!(expiry >= before + chrono::Duration::seconds(3600));
        assert!(expiry_from_now(u64::MAX).is_err());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_exchange() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("shared-token", 3600))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = create_test_config(&format!("{}/token", mock_server.uri()));
        let client = Arc::new(OAuth2Client::new(config).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.get_token().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "shared-token");
        }
    }

    #[tokio::test]
    async fn test_invalidate_forces_exchange() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("after-invalidate", 3600)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = create_test_config(&format!("{}/token", mock_server.uri()));
        let client = OAuth2Client::new(config).unwrap();
        seed_cache(&client, "revoked", 3600).await;

        client.invalidate().await;
        assert_eq!(client.get_token().await.unwrap(), "after-invalidate");
    }

    #[tokio::test]
    async fn test_persisted_token_is_used_without_exchange() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("unused", 3600)))
            .expect(0)
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileTokenStore::new(dir.path().join("token.json")));
        store
            .save(&PersistedToken {
                access_token: "from-disk".to_string(),
                expiry: Utc::now() + chrono::Duration::seconds(3600),
                extra: serde_json::Map::new(),
            })
            .await
            .unwrap();

        let config = create_test_config(&format!("{}/token", mock_server.uri()));
        let client = OAuth2Client::new(config).unwrap().with_store(store);

        assert_eq!(client.get_token().await.unwrap(), "from-disk");
    }

    #[tokio::test]
    async fn test_fetched_token_is_persisted() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("to-disk", 3600)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileTokenStore::new(dir.path().join("token.json")));

        let config = create_test_config(&format!("{}/token", mock_server.uri()));
        let client = OAuth2Client::new(config).unwrap().with_store(store.clone());
        client.get_token().await.unwrap();

        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.access_token, "to-disk");
        assert_eq!(persisted.extra.get("token_type"), Some(&json!("Bearer")));
        let remaining = (persisted.expiry - Utc::now()).num_seconds();
        assert!((3590..=3600).contains(&remaining));
    }

    #[tokio::test]
    async fn test_corrupt_persisted_token_falls_back_to_exchange() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("recovered", 3600)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        tokio::fs::write(&path, b"garbage").await.unwrap();

        let config = create_test_config(&format!("{}/token", mock_server.uri()));
        let client = OAuth2Client::new(config)
            .unwrap()
            .with_store(Arc::new(FileTokenStore::new(&path)));

        assert_eq!(client.get_token().await.unwrap(), "recovered");
    }
}
