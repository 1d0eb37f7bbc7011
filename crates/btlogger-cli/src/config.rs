//! BTLogger CLI configuration
//!
//! Configuration is layered with figment, later layers winning:
//! - built-in defaults
//! - `btlogger.toml` in the working directory, or the file given by `--config`
//! - environment variables prefixed `BTLOGGER_`, `__` separating sections
//!   (`BTLOGGER_STORAGE__ROTATION_THRESHOLD=65536`)
//! - command-line flags
//!
//! Durations are written in milliseconds.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use btlogger_core::{ConfigError, LinkConfig, SchedulerConfig, StorageConfig};

pub const DEFAULT_CONFIG_FILE: &str = "btlogger.toml";
pub const ENV_PREFIX: &str = "BTLOGGER_";

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            storage: StorageConfig::new(default_log_root()),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Per-user data directory, falling back to the working directory
pub fn default_log_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("btlogger").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

impl AppConfig {
    /// Load every layer and apply the command-line overrides
    pub fn load(config_file: Option<&Path>, log_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match config_file {
            Some(path) if !path.is_file() => {
                return Err(ConfigError::Loading(format!("{} does not exist", path.display())));
            }
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let figment = Self::figment(&file).merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment, log_dir)
    }

    /// Defaults overlaid with a TOML file; a missing file adds nothing
    fn figment(file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
    }

    fn extract(figment: Figment, log_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config: AppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(e.to_string()))?;

        if let Some(dir) = log_dir {
            config.storage.root = dir.to_path_buf();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.link.validate()?;
        self.storage.validate()?;
        self.scheduler.validate()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn from_toml(content: &str, log_dir: Option<&Path>) -> Result<AppConfig, ConfigError> {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("btlogger.toml");
        std::fs::write(&file, content).unwrap();
        AppConfig::extract(AppConfig::figment(&file), log_dir)
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.root, default_log_root());
        assert_eq!(config.scheduler.mailbox_capacity, 10);
        assert!(config.link.auto_connect);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let config = from_toml(
            r#"
            [link]
            auto_connect = false
            retry_interval = 5000

            [storage]
            root = "/var/log/btlogger"
            rotation_threshold = 65536
            "#,
            None,
        )
        .unwrap();

        assert!(!config.link.auto_connect);
        assert_eq!(config.link.retry_interval, Duration::from_secs(5));
        assert_eq!(config.storage.root, PathBuf::from("/var/log/btlogger"));
        assert_eq!(config.storage.rotation_threshold, 65536);
        // Untouched keys keep their defaults
        assert_eq!(config.storage.max_loaded_lines, 1000);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn test_log_dir_flag_wins() {
        let config = from_toml("[storage]\nroot = \"/from/file\"\n", Some(Path::new("/from/flag"))).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/from/flag"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = from_toml("[scheduler]\nmailbox_capacity = 0\n", None).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = from_toml("[link]\nauto_connect = \"sometimes\"\n", None).unwrap_err();
        assert!(matches!(err, ConfigError::Loading(_)));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/btlogger.toml")), None).unwrap_err();
        assert!(matches!(err, ConfigError::Loading(_)));
    }

    #[test]
    fn test_toml_output_loads_back() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[link]"));
        assert!(text.contains("[storage]"));
        assert!(text.contains("[scheduler]"));
        assert_eq!(from_toml(&text, None).unwrap(), config);
    }
}
