//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading, parsing, or
/// validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The specified config file was not found.
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// Failed to create the default config file.
    #[error("failed to create default config: {0}")]
    CreateDefault(String),

    /// TOML parsing failed.
    #[error("TOML parse error: {0}")]
    Parse(String),

    /// A setting has an invalid value.
    #[error("invalid config value: {0}")]
    Invalid(String),

    /// I/O error while reading or writing config files.
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_not_found_display() {
        let err = ConfigError::NotFound(PathBuf::from("/etc/dapmux/config.toml"));
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn error_parse_display() {
        let err = ConfigError::Parse("expected table".into());
        assert_eq!(err.to_string(), "TOML parse error: expected table");
    }

    #[test]
    fn error_invalid_display() {
        let err = ConfigError::Invalid("timeouts.request_ms must be > 0".into());
        assert!(err.to_string().contains("request_ms"));
    }

    #[test]
    fn error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ConfigError::from(io);
        assert!(err.to_string().contains("denied"));
    }
}
