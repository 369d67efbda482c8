//! Configuration for the InsightOps client.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ApiError, ApiResult};

/// Default backend URL when nothing is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Workspace used by the chat endpoints when none is selected.
pub const DEFAULT_WORKSPACE_ID: &str = "default-workspace";

/// Environment variable holding the backend URL.
const API_URL_ENV: &str = "INSIGHTOPS_API_URL";
/// Environment variable holding the session database path.
const STORAGE_PATH_ENV: &str = "INSIGHTOPS_STORAGE_PATH";
/// Environment variable holding the chat workspace.
const WORKSPACE_ENV: &str = "INSIGHTOPS_WORKSPACE_ID";

/// Configuration for the API client and its local state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the backend, without a trailing `/api`.
    pub api_url: String,
    /// Request timeout.
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    /// Connection timeout.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    /// SQLite file holding the persisted session.
    pub storage_path: PathBuf,
    /// Workspace used for chat history and questions.
    pub workspace_id: String,
    /// Chat history older than this is hidden client-side.
    #[serde(with = "duration_serde")]
    pub chat_expiry: Duration,
    /// Freshness windows for cached server views.
    pub cache: CacheConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            storage_path: PathBuf::from("insightops.db"),
            workspace_id: DEFAULT_WORKSPACE_ID.to_string(),
            chat_expiry: Duration::from_secs(20 * 60),
            cache: CacheConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a new config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from `INSIGHTOPS_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(API_URL_ENV) {
            config.api_url = url;
        }
        if let Ok(path) = std::env::var(STORAGE_PATH_ENV) {
            config.storage_path = PathBuf::from(path);
        }
        if let Ok(workspace) = std::env::var(WORKSPACE_ENV) {
            config.workspace_id = workspace;
        }
        config
    }

    /// Set the backend URL.
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Set request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the session database path.
    #[must_use]
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    /// Set the chat workspace.
    #[must_use]
    pub fn with_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = workspace_id.into();
        self
    }

    /// Set the chat history expiry window.
    #[must_use]
    pub const fn with_chat_expiry(mut self, expiry: Duration) -> Self {
        self.chat_expiry = expiry;
        self
    }

    /// Parsed base URL.
    ///
    /// # Errors
    /// Returns an error if `api_url` is not a valid URL.
    pub fn base_url(&self) -> ApiResult<Url> {
        Ok(Url::parse(&self.api_url)?)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ApiResult<()> {
        let url = self.base_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ApiError::Config(format!(
                "api_url must be http or https, got {}",
                url.scheme()
            )));
        }

        if self.request_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(ApiError::Config("timeouts must be > 0".to_string()));
        }

        if self.chat_expiry.is_zero() {
            return Err(ApiError::Config("chat_expiry must be > 0".to_string()));
        }

        if self.cache.max_entries == 0 {
            return Err(ApiError::Config("cache.max_entries must be > 0".to_string()));
        }

        if self.workspace_id.trim().is_empty() {
            return Err(ApiError::Config("workspace_id must not be empty".to_string()));
        }

        Ok(())
    }
}

/// How long cached server views stay fresh.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether caching is enabled.
    pub enabled: bool,
    /// Chat history (seconds).
    pub chat_history_ttl_seconds: u64,
    /// AI status (seconds).
    pub chat_status_ttl_seconds: u64,
    /// Current user profile (seconds).
    pub user_ttl_seconds: u64,
    /// Everything else (seconds).
    pub default_ttl_seconds: u64,
    /// Upper bound on stored views.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chat_history_ttl_seconds: 30,
            chat_status_ttl_seconds: 60,
            user_ttl_seconds: 300,
            default_ttl_seconds: 30,
            max_entries: crate::cache::DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Serde module for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.chat_expiry, Duration::from_secs(1200));
        assert_eq!(config.workspace_id, "default-workspace");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new()
            .with_api_url("https://api.example.com")
            .with_timeout(Duration::from_secs(5))
            .with_workspace("ops");

        assert_eq!(config.api_url, "https://api.example.com");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.workspace_id, "ops");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ClientConfig::new().with_api_url("not a url").validate().is_err());
        assert!(ClientConfig::new().with_api_url("ftp://host").validate().is_err());
        assert!(
            ClientConfig::new()
                .with_chat_expiry(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(ClientConfig::new().with_workspace("  ").validate().is_err());

        let mut unbounded = ClientConfig::new();
        unbounded.cache.max_entries = 0;
        assert!(unbounded.validate().is_err());
    }

    #[test]
    fn test_duration_roundtrip_as_seconds() {
        let json = serde_json::to_value(ClientConfig::default()).unwrap_or_default();
        assert_eq!(json["chat_expiry"], 1200);
    }
}
