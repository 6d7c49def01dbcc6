//! Configuration loading.

use std::path::Path;

use crate::config::DapmuxConfig;
use crate::error::ConfigError;

/// Content written into a newly-created default config file.
const DEFAULT_CONFIG_CONTENT: &str = r#"# dapmux configuration
# Uncomment and edit settings below to override defaults.

# [timeouts]
# request_ms = 30000
# launch_wait_ms = 2000
# initialized_event_ms = 10000
# disconnect_ms = 5000
# child_handshake_ms = 5000
# port_scrape_ms = 10000
# pause_wait_ms = 10000

# [traces]
# buffer_cap = 10000
# variables_per_trace = 100

# [adapters.python]
# command = "python3"
# args = ["-m", "debugpy.adapter"]
"#;

/// Load configuration from `config_dir/config.toml`.
///
/// If the file does not exist it is created with commented-out defaults
/// and the defaults are returned. The parsed result is validated.
///
/// # Errors
///
/// Returns [`ConfigError`] on I/O failure, parse failure, or validation
/// failure.
pub fn load_config(config_dir: &Path) -> Result<DapmuxConfig, ConfigError> {
    let path = config_dir.join("config.toml");

    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)?;
    }

    if !path.exists() {
        std::fs::write(&path, DEFAULT_CONFIG_CONTENT)
            .map_err(|e| ConfigError::CreateDefault(e.to_string()))?;
        tracing::info!("created default config at {}", path.display());
        return Ok(DapmuxConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config: DapmuxConfig =
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("dapmux");

        let config = load_config(&config_dir).unwrap();
        assert_eq!(config, DapmuxConfig::default());
        assert!(config_dir.join("config.toml").exists());

        let content = std::fs::read_to_string(config_dir.join("config.toml")).unwrap();
        assert!(content.contains("# dapmux configuration"));
    }

    #[test]
    fn load_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[timeouts]\nrequest_ms = 1234\n",
        )
        .unwrap();

        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.timeouts.request_ms, 1234);
        assert_eq!(config.traces.buffer_cap, 10_000);
    }

    #[test]
    fn load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "not [valid toml").unwrap();

        let err = load_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[traces]\nbuffer_cap = 0\n",
        )
        .unwrap();

        let err = load_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_commented_default_file_parses_as_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("dapmux");

        // First load creates the file; second load parses it.
        load_config(&config_dir).unwrap();
        let config = load_config(&config_dir).unwrap();
        assert_eq!(config, DapmuxConfig::default());
    }
}
