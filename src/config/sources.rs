use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

pub(crate) const CONFIG_ENV_VAR: &str = "AGRISHARE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/agrishare.toml";
const ENV_PREFIX: &str = "AGRISHARE";
const ENV_SEPARATOR: &str = "__";
const API_URL_ENV_VAR: &str = "AGRISHARE_API_URL";

/// Load configuration with priority (lowest to highest):
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. `.env` file (via dotenvy)
/// 4. Process environment
pub fn load() -> Result<Config, ConfigError> {
    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_with_env(config_path)
}

/// Same as [`load`] but with an explicit file path (the CLI `--config` flag)
pub fn load_with_env(config_path: PathBuf) -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let mut config = load_from_sources(config_path)?;
    apply_overrides(&mut config);
    Ok(config)
}

/// Shortcut variables that sit outside the `AGRISHARE__` namespace
fn apply_overrides(config: &mut Config) {
    if let Ok(base_url) = env::var(API_URL_ENV_VAR) {
        if !base_url.trim().is_empty() {
            config.api.base_url = base_url;
        }
    }
}

/// Load configuration from a specific path and the `AGRISHARE__*` environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // AGRISHARE__UPLOAD__MAX_FILES -> upload.max_files
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
