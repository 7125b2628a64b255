//! CLI configuration management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpsConfig {
    /// Where the trust store lives. Defaults to the platform data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub authority: AuthorityConfig,
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    /// Accept locally valid keys when the authority is unreachable.
    #[serde(default = "default_true")]
    pub offline_fallback: bool,
    /// Options an unlicensed install may select at once.
    #[serde(default = "default_free_option_limit")]
    pub free_option_limit: usize,
    #[serde(default = "default_admin_password")]
    pub default_admin_password: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for KpsConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            authority: AuthorityConfig::default(),
            remote_timeout_secs: default_remote_timeout_secs(),
            offline_fallback: true,
            free_option_limit: default_free_option_limit(),
            default_admin_password: default_admin_password(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_remote_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_free_option_limit() -> usize {
    3
}

fn default_admin_password() -> String {
    "admin".to_string()
}

/// Remote authority connection settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorityConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Base URL for the `rest` backend.
    pub url: Option<String>,
    pub api_key: Option<String>,
    /// Connection string for the `postgres` backend.
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    None,
    Memory,
    Rest,
    Postgres,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl KpsConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn project_dirs() -> Result<directories::ProjectDirs, Box<dyn std::error::Error>> {
        Ok(directories::ProjectDirs::from("io", "kps", "kps")
            .ok_or("Could not determine config directory")?)
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        Ok(Self::project_dirs()?.config_dir().join("config.yaml"))
    }

    /// Directory holding the trust store.
    pub fn data_dir(&self) -> Result<PathBuf, Box<dyn std::error::Error>> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::project_dirs()?.data_dir().to_path_buf()),
        }
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "data_dir" => self.data_dir = optional(value).map(PathBuf::from),
            "authority.backend" => {
                self.authority.backend = match value {
                    "none" => Backend::None,
                    "memory" => Backend::Memory,
                    "rest" => Backend::Rest,
                    "postgres" => Backend::Postgres,
                    _ => return Err(format!("Invalid backend: {}", value)),
                };
            }
            "authority.url" => self.authority.url = optional(value),
            "authority.api_key" => self.authority.api_key = optional(value),
            "authority.database_url" => self.authority.database_url = optional(value),
            "remote_timeout_secs" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| format!("Invalid timeout: {}", value))?;
                if secs == 0 {
                    return Err("remote_timeout_secs must be at least 1".to_string());
                }
                self.remote_timeout_secs = secs;
            }
            "offline_fallback" => {
                self.offline_fallback = value
                    .parse()
                    .map_err(|_| format!("Invalid boolean: {}", value))?;
            }
            "free_option_limit" => {
                self.free_option_limit = value
                    .parse()
                    .map_err(|_| format!("Invalid limit: {}", value))?;
            }
            "default_admin_password" => {
                if value.is_empty() {
                    return Err("default_admin_password cannot be empty".to_string());
                }
                self.default_admin_password = value.to_string();
            }
            "log_format" => {
                self.log_format = match value {
                    "text" => LogFormat::Text,
                    "json" => LogFormat::Json,
                    _ => return Err(format!("Invalid log format: {}", value)),
                };
            }
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KpsConfig::default();
        assert_eq!(config.authority.backend, Backend::None);
        assert_eq!(config.remote_timeout(), Duration::from_secs(10));
        assert!(config.offline_fallback);
        assert_eq!(config.free_option_limit, 3);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "authority:\n  backend: rest\n  url: https://store.example.com\noffline_fallback: false\n";
        let config: KpsConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.authority.backend, Backend::Rest);
        assert_eq!(
            config.authority.url.as_deref(),
            Some("https://store.example.com")
        );
        assert!(!config.offline_fallback);
        assert_eq!(config.remote_timeout_secs, 10);
        assert_eq!(config.default_admin_password, "admin");
    }

    #[test]
    fn test_set_validates_values() {
        let mut config = KpsConfig::default();
        config.set("authority.backend", "postgres").unwrap();
        config.set("remote_timeout_secs", "3").unwrap();
        config.set("offline_fallback", "false").unwrap();
        config.set("log_format", "json").unwrap();
        assert_eq!(config.authority.backend, Backend::Postgres);
        assert_eq!(config.remote_timeout(), Duration::from_secs(3));
        assert!(!config.offline_fallback);
        assert_eq!(config.log_format, LogFormat::Json);

        assert!(config.set("authority.backend", "sqlite").is_err());
        assert!(config.set("remote_timeout_secs", "0").is_err());
        assert!(config.set("offline_fallback", "maybe").is_err());
        assert!(config.set("no_such_key", "x").is_err());
    }

    #[test]
    fn test_empty_value_clears_optional_keys() {
        let mut config = KpsConfig::default();
        config.set("authority.url", "https://store.example.com").unwrap();
        config.set("authority.url", "").unwrap();
        assert_eq!(config.authority.url, None);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = KpsConfig::default();
        config.set("data_dir", "/var/lib/kps").unwrap();
        config.set("free_option_limit", "5").unwrap();
        config.save_to(&path).unwrap();

        assert_eq!(KpsConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = KpsConfig::load_from(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, KpsConfig::default());
    }
}
