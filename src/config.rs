//! Runtime configuration
//!
//! Values come from defaults, then from the environment (a `.env` file is
//! honoured), then from explicit builder calls.

use crate::error::{Result, VidqaError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Environment variable holding the history database path
pub const ENV_HISTORY_DB: &str = "VIDQA_HISTORY_DB";
/// Environment variable holding the history capacity
pub const ENV_MAX_HISTORY_ITEMS: &str = "VIDQA_MAX_HISTORY_ITEMS";
/// Environment variable holding the transcript cache capacity
pub const ENV_TRANSCRIPT_CACHE_CAPACITY: &str = "VIDQA_TRANSCRIPT_CACHE_CAPACITY";
/// Environment variable holding the suggestion cache capacity
pub const ENV_SUGGESTION_CACHE_CAPACITY: &str = "VIDQA_SUGGESTION_CACHE_CAPACITY";

/// Configuration for the cache and history components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Location of the SQLite history database
    pub history_db: PathBuf,

    /// Maximum number of retained history items
    pub max_history_items: usize,

    /// Number of transcripts kept in memory
    pub transcript_cache_capacity: usize,

    /// Number of suggestion lists kept in memory
    pub suggestion_cache_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            history_db: default_history_db(),
            max_history_items: 200,
            transcript_cache_capacity: 20,
            suggestion_cache_capacity: 20,
        }
    }
}

/// Default database location under the platform data directory
fn default_history_db() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vidqa")
        .join("history.db")
}

impl AppConfig {
    /// Create a new builder for the configuration
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Load configuration from the environment (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Ok(path) = std::env::var(ENV_HISTORY_DB) {
            config.history_db = PathBuf::from(path);
        }
        if let Some(n) = read_usize(ENV_MAX_HISTORY_ITEMS)? {
            config.max_history_items = n;
        }
        if let Some(n) = read_usize(ENV_TRANSCRIPT_CACHE_CAPACITY)? {
            config.transcript_cache_capacity = n;
        }
        if let Some(n) = read_usize(ENV_SUGGESTION_CACHE_CAPACITY)? {
            config.suggestion_cache_capacity = n;
        }

        config.validate()?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_history_items == 0 {
            return Err(VidqaError::Config(
                "max_history_items must be greater than 0".to_string(),
            ));
        }

        if self.transcript_cache_capacity == 0 {
            return Err(VidqaError::Config(
                "transcript_cache_capacity must be greater than 0".to_string(),
            ));
        }

        if self.suggestion_cache_capacity == 0 {
            return Err(VidqaError::Config(
                "suggestion_cache_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn read_usize(var: &str) -> Result<Option<usize>> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| VidqaError::Config(format!("{} must be a positive integer: {}", var, e))),
        Err(_) => Ok(None),
    }
}

/// Builder for the configuration
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    history_db: Option<PathBuf>,
    max_history_items: Option<usize>,
    transcript_cache_capacity: Option<usize>,
    suggestion_cache_capacity: Option<usize>,
}

impl AppConfigBuilder {
    /// Set the history database path
    pub fn history_db(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_db = Some(path.into());
        self
    }

    /// Set the history capacity
    pub fn max_history_items(mut self, max: usize) -> Self {
        self.max_history_items = Some(max);
        self
    }

    /// Set the transcript cache capacity
    pub fn transcript_cache_capacity(mut self, capacity: usize) -> Self {
        self.transcript_cache_capacity = Some(capacity);
        self
    }

    /// Set the suggestion cache capacity
    pub fn suggestion_cache_capacity(mut self, capacity: usize) -> Self {
        self.suggestion_cache_capacity = Some(capacity);
        self
    }

    /// Build the configuration
    pub fn build(self) -> AppConfig {
        let defaults = AppConfig::default();

        AppConfig {
            history_db: self.history_db.unwrap_or(defaults.history_db),
            max_history_items: self.max_history_items.unwrap_or(defaults.max_history_items),
            transcript_cache_capacity: self
                .transcript_cache_capacity
                .unwrap_or(defaults.transcript_cache_capacity),
            suggestion_cache_capacity: self
                .suggestion_cache_capacity
                .unwrap_or(defaults.suggestion_cache_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.max_history_items, 200);
        assert_eq!(config.transcript_cache_capacity, 20);
        assert!(config.history_db.ends_with("history.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut invalid = AppConfig::default();
        invalid.max_history_items = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = AppConfig::default();
        invalid.suggestion_cache_capacity = 0;
        assert!(matches!(invalid.validate(), Err(VidqaError::Config(_))));
    }

    #[test]
    fn test_config_builder() {
        let config = AppConfig::builder()
            .history_db("/tmp/vidqa-test.db")
            .max_history_items(3)
            .transcript_cache_capacity(5)
            .build();

        assert_eq!(config.history_db, PathBuf::from("/tmp/vidqa-test.db"));
        assert_eq!(config.max_history_items, 3);
        assert_eq!(config.transcript_cache_capacity, 5);
        assert_eq!(config.suggestion_cache_capacity, 20);
    }
}
