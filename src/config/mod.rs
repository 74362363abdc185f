//! Configuration management for workstream
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use workstream::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Coordinator: {}", config.coordinator.url);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `WORKSTREAM__<section>__<key>`
//!
//! Examples:
//! - `WORKSTREAM__COORDINATOR__URL=wss://pow.example.com/ws/worker`
//! - `WORKSTREAM__WORKERS__COUNT=16`
//! - `WORKSTREAM__WORKERS__POLL_INTERVAL=250ms`
//!
//! The authorization credential is only ever read from `WORKSTREAM_AUTH_TOKEN`
//! (or passed on the command line), never from the configuration file.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/workstream.toml`.
//! This can be overridden using the `WORKSTREAM_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::HumanDuration;
pub use models::{Config, CoordinatorConfig, ReconnectConfig, WorkersConfig};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

/// Command line values that win over every other source
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub auth_token: Option<String>,
    pub workers: Option<usize>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(url) = self.url {
            config.coordinator.url = url;
        }
        if let Some(token) = self.auth_token {
            config.coordinator.auth_token = Some(token);
        }
        if let Some(workers) = self.workers {
            config.workers.count = workers;
        }
    }
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`WORKSTREAM__*`, `WORKSTREAM_AUTH_TOKEN`)
    /// 2. TOML file (default: `config/workstream.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or
    /// validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_overrides(Overrides::default())
    }

    /// Load from all sources, apply `overrides` on top, then validate once
    pub fn load_with_overrides(overrides: Overrides) -> Result<Self, ConfigError> {
        Self::finish(sources::load()?, overrides)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        Self::load_from_path_with_overrides(path, Overrides::default())
    }

    pub fn load_from_path_with_overrides(
        path: std::path::PathBuf,
        overrides: Overrides,
    ) -> Result<Self, ConfigError> {
        Self::finish(sources::load_from_sources(path)?, overrides)
    }

    fn finish(mut config: Config, overrides: Overrides) -> Result<Self, ConfigError> {
        overrides.apply(&mut config);
        validation::validate(&config)?;
        Ok(config)
    }
}
