//! Configuration management for the agrishare client
//!
//! Settings are layered from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use agrishare::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Talking to: {}", config.api.base_url);
//! ```
//!
//! # Environment Variables
//!
//! Any key can be overridden with `AGRISHARE__<section>__<key>`:
//! - `AGRISHARE__API__BASE_URL=https://data.example.org`
//! - `AGRISHARE__UPLOAD__MAX_FILE_SIZE=250MB`
//! - `AGRISHARE__SESSION__IDLE_TIMEOUT_SECS=900`
//!
//! `AGRISHARE_API_URL` is accepted as a shortcut for the base URL.
//!
//! # Configuration File
//!
//! Loaded from `config/agrishare.toml` unless `AGRISHARE_CONFIG` points elsewhere.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{ApiConfig, Config, SessionConfig, TelemetryConfig, UploadConfig};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Failed to render configuration: {0}")]
    RenderError(#[from] toml::ser::Error),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from an explicit file, still honouring the environment
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_with_env(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Effective configuration rendered back to TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Name of the variable that selects the config file
    pub fn path_env_var() -> &'static str {
        sources::CONFIG_ENV_VAR
    }
}
