use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GmailError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one JSON file per stored key
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Override of the Gmail REST root (e.g. a proxy); must end with '/'
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            user_id: default_user_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_credentials")]
    pub credentials: PathBuf,
    #[serde(default = "default_token_cache")]
    pub token_cache: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials: default_credentials(),
            token_cache: default_token_cache(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    /// List recent inbox messages through the Gmail API
    #[default]
    Gmail,
    /// Read messages from a JSON file written by an external scraper
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub source: DiscoverySource,
    #[serde(default = "default_query")]
    pub query: String,
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,
    #[serde(default = "default_inbox_file")]
    pub inbox_file: PathBuf,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            source: DiscoverySource::default(),
            query: default_query(),
            max_messages: default_max_messages(),
            inbox_file: default_inbox_file(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".gmail-rules")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    300
}

fn default_user_id() -> String {
    "me".to_string()
}

fn default_credentials() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_cache() -> PathBuf {
    PathBuf::from(".gmail-rules/token.json")
}

fn default_query() -> String {
    "in:inbox newer_than:1d".to_string()
}

fn default_max_messages() -> u32 {
    50
}

fn default_inbox_file() -> PathBuf {
    PathBuf::from(".gmail-rules/inbox.json")
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.storage.dir.as_os_str().is_empty() {
            return Err(GmailError::ConfigError(
                "storage.dir cannot be empty".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(GmailError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts > 10 {
            return Err(GmailError::ConfigError(
                "retry.max_attempts cannot exceed 10".to_string(),
            ));
        }
        if self.retry.base_delay_ms == 0 || self.retry.base_delay_ms > 60_000 {
            return Err(GmailError::ConfigError(
                "retry.base_delay_ms must be between 1 and 60000".to_string(),
            ));
        }

        if let Some(base_url) = &self.api.base_url {
            if !base_url.ends_with('/') {
                return Err(GmailError::ConfigError(format!(
                    "api.base_url must end with '/': {}",
                    base_url
                )));
            }
        }
        if self.api.user_id.is_empty() {
            return Err(GmailError::ConfigError(
                "api.user_id cannot be empty".to_string(),
            ));
        }

        if self.discovery.max_messages == 0 || self.discovery.max_messages > 500 {
            return Err(GmailError::ConfigError(
                "discovery.max_messages must be between 1 and 500".to_string(),
            ));
        }
        if self.discovery.source == DiscoverySource::Gmail && self.discovery.query.trim().is_empty() {
            return Err(GmailError::ConfigError(
                "discovery.query cannot be empty when discovery.source = \"gmail\"".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
