//! Configuration management for mediaswap
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use mediaswap::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Status router on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `MEDIASWAP__<section>__<key>`
//!
//! Examples:
//! - `MEDIASWAP__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `MEDIASWAP__FETCH__TIMEOUT_SECS=30`
//! - `MEDIASWAP__TRANSCODE__ALLOW_TRANSCODING=true`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/mediaswap.toml`.
//! This can be overridden using the `MEDIASWAP_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{
    CacheConfig, Config, FetchConfig, FilterConfig, RuntimeConfig, SelectionConfig, ServerConfig,
    TranscodeConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

use crate::query::ContentFilter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`MEDIASWAP__*`)
    /// 2. TOML file (default: `config/mediaswap.toml`)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    pub fn content_filter(&self) -> ContentFilter {
        ContentFilter::new(
            self.filter.restrictive,
            &self.filter.blacklist_tags,
            &self.filter.whitelist_tags,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{MediaRating, QueryResult};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[[queries]]
kind = "remote"
urls = ["https://i.example.com/a.png"]
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.queries.len(), 1);
    }

    #[test]
    fn test_validation_catches_empty_query() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[[queries]]
kind = "remote"
urls = []
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::EmptyRemoteQuery { index: 0 })
        ));
    }

    #[test]
    fn test_content_filter_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[filter]
restrictive = true
blacklist_tags = ["gore", "spiders"]
whitelist_tags = ["spiders"]
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let filter = Config::load_from_path(config_path).unwrap().content_filter();
        let tagged = |tag: &str| QueryResult::local("/m/a.png", MediaRating::Safe, vec![tag.to_string()]);

        assert!(filter.is_censored(&tagged("gore")));
        assert!(!filter.is_censored(&tagged("spiders")));
    }
}
