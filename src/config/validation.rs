use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("api.base_url '{0}' must start with http:// or https://")]
    InvalidBaseUrl(String),

    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("upload.accept entry '{0}' is neither an extension (.csv) nor a MIME pattern (text/*)")]
    InvalidAcceptEntry(String),
}

/// Validate a loaded configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_api(config)?;
    validate_session(config)?;
    validate_upload(config)?;
    Ok(())
}

fn validate_api(config: &Config) -> Result<(), ValidationError> {
    let url = config.api.base_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ValidationError::InvalidBaseUrl(config.api.base_url.clone()));
    }

    non_zero("api.connect_timeout_secs", config.api.connect_timeout_secs)?;
    non_zero("api.request_timeout_secs", config.api.request_timeout_secs)?;
    Ok(())
}

fn validate_session(config: &Config) -> Result<(), ValidationError> {
    non_zero("session.expiry_sweep_secs", config.session.expiry_sweep_secs)?;
    non_zero("session.idle_timeout_secs", config.session.idle_timeout_secs)?;
    non_zero("session.storage_poll_ms", config.session.storage_poll_ms)?;
    Ok(())
}

fn validate_upload(config: &Config) -> Result<(), ValidationError> {
    let upload = &config.upload;
    non_zero("upload.max_file_size", upload.max_file_size.as_u64())?;
    non_zero("upload.max_files", upload.max_files as u64)?;
    non_zero("upload.chunk_size", upload.chunk_size.as_u64())?;

    for entry in &upload.accept {
        if !is_valid_accept_entry(entry) {
            return Err(ValidationError::InvalidAcceptEntry(entry.clone()));
        }
    }
    Ok(())
}

fn non_zero(field: &'static str, value: u64) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::ZeroValue { field });
    }
    Ok(())
}

fn is_valid_accept_entry(entry: &str) -> bool {
    let entry = entry.trim();
    if let Some(ext) = entry.strip_prefix('.') {
        return !ext.is_empty() && !ext.contains('/');
    }
    match entry.split_once('/') {
        Some((top, sub)) => !top.is_empty() && !sub.is_empty() && top != "*",
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::ByteSize;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let mut config = Config::default();
        config.api.base_url = "ftp://data.example.org".to_string();

        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidBaseUrl(_)));
    }

    #[test]
    fn test_rejects_zero_limits() {
        let mut config = Config::default();
        config.upload.max_files = 0;
        assert!(matches!(
            validate(&config).unwrap_err(),
            ValidationError::ZeroValue { field: "upload.max_files" }
        ));

        let mut config = Config::default();
        config.upload.max_file_size = ByteSize(0);
        assert!(matches!(
            validate(&config).unwrap_err(),
            ValidationError::ZeroValue { field: "upload.max_file_size" }
        ));

        let mut config = Config::default();
        config.session.expiry_sweep_secs = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_accept_entries() {
        assert!(is_valid_accept_entry(".csv"));
        assert!(is_valid_accept_entry("text/*"));
        assert!(is_valid_accept_entry("application/json"));
        assert!(!is_valid_accept_entry("csv"));
        assert!(!is_valid_accept_entry("."));
        assert!(!is_valid_accept_entry("*/*"));
        assert!(!is_valid_accept_entry("text/"));

        let mut config = Config::default();
        config.upload.accept = vec![".csv".into(), "spreadsheet".into()];
        assert!(matches!(
            validate(&config).unwrap_err(),
            ValidationError::InvalidAcceptEntry(entry) if entry == "spreadsheet"
        ));
    }
}
