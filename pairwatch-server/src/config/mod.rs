//! Configuration module for pairwatch-server.
//!
//! Loads the TOML config file, applies credential overrides from the
//! environment and resolves everything into a [`MonitorConfig`].

pub mod file;
pub mod runtime;

use crate::config::file::FileConfig;
pub use crate::config::runtime::MonitorConfig;
use std::path::Path;
use thiserror::Error;

/// Environment override for `[auth].username`.
pub const USERNAME_ENV: &str = "PAIRWATCH_USERNAME";
/// Environment override for `[auth].password`.
pub const PASSWORD_ENV: &str = "PAIRWATCH_PASSWORD";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply credential overrides from the environment
    /// 3. Validate the configuration
    /// 4. Resolve it into a [`MonitorConfig`]
    pub fn load(&self) -> Result<MonitorConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Ok(username) = std::env::var(USERNAME_ENV) {
            file_config.auth.username = username;
        }
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            file_config.auth.password = password;
        }

        self.validate(&file_config)?;

        Ok(MonitorConfig::from_file(file_config))
    }

    fn validate(&self, config: &FileConfig) -> Result<(), ConfigError> {
        if !config.push.looks_valid() {
            return Err(ConfigError::ValidationError(
                "push endpoint needs a host and an absolute path".into(),
            ));
        }
        if !config.pull.looks_valid() {
            return Err(ConfigError::ValidationError(
                "pull endpoint needs a host and an absolute path".into(),
            ));
        }
        if config.auth.username.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "no username configured ([auth] section or {USERNAME_ENV})"
            )));
        }
        for (name, secs) in [
            ("pull_interval_secs", config.monitor.pull_interval_secs),
            (
                "long_pull_interval_secs",
                config.monitor.long_pull_interval_secs,
            ),
            ("report_interval_secs", config.monitor.report_interval_secs),
            ("staleness_secs", config.monitor.staleness_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "monitor.{name} must be nonzero"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_rejects_zero_intervals() {
        let toml_str = r#"
[push]
host = "push.example.com"
path = "/push"

[pull]
host = "pull.example.com"
path = "/pull"

[auth]
username = "u"
password = "p"

[monitor]
pull_interval_secs = 0
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        let loader = ConfigLoader::new("unused.toml");
        assert!(matches!(
            loader.validate(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validation_rejects_relative_path() {
        let toml_str = r#"
[push]
host = "push.example.com"
path = "push"

[pull]
host = "pull.example.com"
path = "/pull"

[auth]
username = "u"
password = "p"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        let loader = ConfigLoader::new("unused.toml");
        assert!(loader.validate(&config).is_err());
    }
}
