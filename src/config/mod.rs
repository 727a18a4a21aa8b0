use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::{Error, Result};

/// Environment variables consulted on top of the configuration file.
pub const ENV_OKTA_DOMAIN: &str = "OKTA_DOMAIN";
pub const ENV_OKTA_CLIENT_ID: &str = "OKTA_CLIENT_ID";
pub const ENV_OKTA_CLIENT_SECRET: &str = "OKTA_CLIENT_SECRET";
pub const ENV_OKTA_AUTH_SERVER_ID: &str = "OKTA_AUTH_SERVER_ID";
pub const ENV_JIRA_DOMAIN: &str = "JIRA_DOMAIN";
pub const ENV_JIRA_EMAIL: &str = "JIRA_EMAIL";
pub const ENV_JIRA_API_TOKEN: &str = "JIRA_API_TOKEN";
pub const ENV_JIRA_PROJECT_KEY: &str = "JIRA_PROJECT_KEY";
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";

/// Longest accepted refresh margin before token expiry (one day).
pub const MAX_EXPIRY_BUFFER_SECONDS: u64 = 86_400;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub okta: OktaConfig,
    #[serde(default)]
    pub jira: JiraConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Protected resource served through `/api/data`.
    pub resource_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            resource_url: None,
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct OktaConfig {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_auth_server_id")]
    pub authorization_server_id: String,
    /// Overrides the `/oauth2/{authorization_server_id}/v1/token` path.
    pub token_path: Option<String>,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_expiry_buffer")]
    pub expiry_buffer_seconds: u64,
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
    /// When set, the access token survives process restarts in this file.
    pub token_cache_path: Option<PathBuf>,
    #[serde(default)]
    pub endpoint_params: HashMap<String, String>,
}

impl Default for OktaConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            authorization_server_id: default_auth_server_id(),
            token_path: None,
            scopes: default_scopes(),
            expiry_buffer_seconds: default_expiry_buffer(),
            timeout_seconds: default_http_timeout(),
            token_cache_path: None,
            endpoint_params: HashMap::new(),
        }
    }
}

impl fmt::Debug for OktaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OktaConfig")
            .field("domain", &self.domain)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("authorization_server_id", &self.authorization_server_id)
            .field("token_path", &self.token_path)
            .field("scopes", &self.scopes)
            .field("expiry_buffer_seconds", &self.expiry_buffer_seconds)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("token_cache_path", &self.token_cache_path)
            .finish()
    }
}

impl OktaConfig {
    pub fn token_url(&self) -> String {
        let path = self
            .token_path
            .clone()
            .unwrap_or_else(|| format!("/oauth2/{}/v1/token", self.authorization_server_id));
        format!("{}{}", self.domain.trim_end_matches('/'), path)
    }

    pub fn oauth2_client_config(&self) -> OAuth2ClientConfig {
        OAuth2ClientConfig {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            token_url: self.token_url(),
            scopes: self.scopes.clone(),
            expiry_buffer: Duration::from_secs(self.expiry_buffer_seconds),
            timeout: Duration::from_secs(self.timeout_seconds),
            endpoint_params: self.endpoint_params.clone(),
        }
    }
}

/// Everything the client-credentials exchange needs, resolved from [`OktaConfig`].
#[derive(Clone)]
pub struct OAuth2ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub expiry_buffer: Duration,
    pub timeout: Duration,
    pub endpoint_params: HashMap<String, String>,
}

impl fmt::Debug for OAuth2ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2ClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .field("expiry_buffer", &self.expiry_buffer)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct JiraConfig {
    /// Bare host, e.g. `example.atlassian.net`.
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub project_key: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            email: String::new(),
            api_token: String::new(),
            project_key: String::new(),
            timeout_seconds: default_http_timeout(),
        }
    }
}

impl fmt::Debug for JiraConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JiraConfig")
            .field("domain", &self.domain)
            .field("email", &self.email)
            .field("api_token", &"[REDACTED]")
            .field("project_key", &self.project_key)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl JiraConfig {
    pub fn base_url(&self) -> String {
        let domain = self.domain.trim_end_matches('/');
        if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.to_string()
        } else {
            format!("https://{}", domain)
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_generation_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_gemini_endpoint(),
            model: default_gemini_model(),
            timeout_seconds: default_generation_timeout(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("max_retries", &self.max_retries)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .finish()
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_auth_server_id() -> String {
    "default".to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "profile".to_string(),
        "email".to_string(),
    ]
}

fn default_expiry_buffer() -> u64 {
    300
}

fn default_http_timeout() -> u64 {
    30
}

fn default_gemini_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_generation_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)?;

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration purely from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        config.apply_env(lookup);
        config.validate()?;
        Ok(config)
    }

    pub async fn load_from_default_locations() -> Result<Self> {
        for path in default_locations() {
            if path.exists() {
                tracing::info!("Loading config from: {:?}", path);
                return Self::load(path).await;
            }
        }

        tracing::info!("No configuration file found, using environment only");
        Self::from_env()
    }

    /// Overlays non-empty environment values onto the file configuration.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_OKTA_DOMAIN) {
            self.okta.domain = v;
        }
        if let Some(v) = get(ENV_OKTA_CLIENT_ID) {
            self.okta.client_id = v;
        }
        if let Some(v) = get(ENV_OKTA_CLIENT_SECRET) {
            self.okta.client_secret = v;
        }
        if let Some(v) = get(ENV_OKTA_AUTH_SERVER_ID) {
            self.okta.authorization_server_id = v;
        }
        if let Some(v) = get(ENV_JIRA_DOMAIN) {
            self.jira.domain = v;
        }
        if let Some(v) = get(ENV_JIRA_EMAIL) {
            self.jira.email = v;
        }
        if let Some(v) = get(ENV_JIRA_API_TOKEN) {
            self.jira.api_token = v;
        }
        if let Some(v) = get(ENV_JIRA_PROJECT_KEY) {
            self.jira.project_key = v;
        }
        if let Some(v) = get(ENV_GEMINI_API_KEY) {
            self.gemini.api_key = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            (&self.okta.domain, ENV_OKTA_DOMAIN),
            (&self.okta.client_id, ENV_OKTA_CLIENT_ID),
            (&self.okta.client_secret, ENV_OKTA_CLIENT_SECRET),
            (&self.okta.authorization_server_id, ENV_OKTA_AUTH_SERVER_ID),
            (&self.jira.domain, ENV_JIRA_DOMAIN),
            (&self.jira.email, ENV_JIRA_EMAIL),
            (&self.jira.api_token, ENV_JIRA_API_TOKEN),
            (&self.jira.project_key, ENV_JIRA_PROJECT_KEY),
            (&self.gemini.api_key, ENV_GEMINI_API_KEY),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(value, _)| value.trim().is_empty())
            .map(|(_, name)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "Missing required configuration: {}",
                missing.join(", ")
            )));
        }

        if !self.okta.domain.starts_with("https://") && !self.okta.domain.starts_with("http://") {
            return Err(Error::Config(format!(
                "Okta domain must be an absolute URL: {}",
                self.okta.domain
            )));
        }

        if self.okta.scopes.is_empty() {
            return Err(Error::Config("At least one OAuth2 scope is required".to_string()));
        }

        if self.okta.expiry_buffer_seconds > MAX_EXPIRY_BUFFER_SECONDS {
            return Err(Error::Config(format!(
                "okta.expiry_buffer_seconds must be at most {}, got {}",
                MAX_EXPIRY_BUFFER_SECONDS, self.okta.expiry_buffer_seconds
            )));
        }

        if self.gemini.max_retries == 0 {
            return Err(Error::Config("gemini.max_retries must be at least 1".to_string()));
        }

        Ok(())
    }
}

fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from("/etc/ticket-relay/config.toml")];
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("ticket-relay/config.toml"));
    }
    if let Some(dir) = dirs::home_dir() {
        locations.push(dir.join(".ticket-relay/config.toml"));
    }
    locations.push(PathBuf::from("./ticket-relay.toml"));
    locations
}
