use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Remote backend connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Ceiling applied by the HTTP client to every request, uploads included.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl ApiConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("agrishare/{}", env!("CARGO_PKG_VERSION"))
}

/// Session persistence and background timers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Directory holding the persisted token slots
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    #[serde(default = "default_expiry_sweep_secs")]
    pub expiry_sweep_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// How often the file store is polled for changes made by other processes
    #[serde(default = "default_storage_poll_ms")]
    pub storage_poll_ms: u64,
}

impl SessionConfig {
    pub fn expiry_sweep(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn storage_poll(&self) -> Duration {
        Duration::from_millis(self.storage_poll_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            expiry_sweep_secs: default_expiry_sweep_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            storage_poll_ms: default_storage_poll_ms(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".agrishare")
}

fn default_expiry_sweep_secs() -> u64 {
    60
}

fn default_idle_timeout_secs() -> u64 {
    5 * 60
}

fn default_storage_poll_ms() -> u64 {
    1000
}

/// Client-side upload limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: ByteSize,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Accept list in HTML `accept` syntax: ".csv", "text/*", "application/json".
    /// Empty means any type.
    #[serde(default)]
    pub accept: Vec<String>,
    /// Size of the body chunks streamed per file; one progress tick per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: ByteSize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
            accept: Vec::new(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_max_file_size() -> ByteSize {
    ByteSize::mib(100)
}

fn default_max_files() -> usize {
    10
}

fn default_chunk_size() -> ByteSize {
    ByteSize::kib(64)
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Default filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.api.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.session.expiry_sweep(), Duration::from_secs(60));
        assert_eq!(config.session.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.upload.max_file_size.as_u64(), 100 * 1024 * 1024);
        assert_eq!(config.upload.max_files, 10);
        assert!(config.upload.accept.is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
[upload]
max_files = 3
accept = [".csv"]
            "#,
        )
        .unwrap();

        assert_eq!(config.upload.max_files, 3);
        assert_eq!(config.upload.accept, vec![".csv"]);
        assert_eq!(config.upload.chunk_size, ByteSize::kib(64));
        assert_eq!(config.session.storage_poll(), Duration::from_millis(1000));
    }
}
