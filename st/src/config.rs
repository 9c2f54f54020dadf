//! StageTrack configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{Operator, Role};
use crate::sync::SyncConfig;

/// Main StageTrack configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local TimerStore location
    pub store: StoreConfig,

    /// Remote authority and retry policy
    pub sync: SyncConfig,

    /// Who is signed in on this device
    pub device: DeviceConfig,

    /// Log filter directive (overridden by RUST_LOG)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.sync.enabled {
            self.sync.validate()?;
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .stagetrack.yml
        let local_config = PathBuf::from(".stagetrack.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/stagetrack/stagetrack.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("stagetrack").join("stagetrack.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the TimerStore database
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        // XDG data directory (~/.local/share/stagetrack on Linux)
        let dir = dirs::data_dir()
            .map(|d| d.join("stagetrack"))
            .unwrap_or_else(|| PathBuf::from(".stagetrack"));
        Self { dir }
    }
}

/// Default identity for commands run on this device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Operator id used when `--operator` is not given
    pub operator: Option<String>,

    pub role: Role,
}

impl DeviceConfig {
    /// Resolve the acting operator, preferring explicit overrides
    pub fn operator(&self, id: Option<&str>, role: Option<Role>) -> Option<Operator> {
        let id = id.map(str::to_string).or_else(|| self.operator.clone())?;
        Some(Operator::new(id, role.unwrap_or(self.role)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(!config.sync.enabled);
        assert!(config.store.dir.ends_with("stagetrack") || config.store.dir.ends_with(".stagetrack"));
        assert!(config.device.operator.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
store:
  dir: /var/lib/stagetrack

sync:
  enabled: true
  base-url: https://plant.example.com/api
  poll-interval-secs: 10
  unsynced-window-secs: 60

device:
  operator: ana
  role: supervisor

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.store.dir, PathBuf::from("/var/lib/stagetrack"));
        assert!(config.sync.enabled);
        assert_eq!(config.sync.base_url, "https://plant.example.com/api");
        assert_eq!(config.sync.poll_interval_secs, 10);
        assert_eq!(config.sync.unsynced_window_secs, 60);
        assert_eq!(config.device.operator.as_deref(), Some("ana"));
        assert_eq!(config.device.role, Role::Supervisor);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
sync:
  base-url: http://10.0.0.5/api
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.sync.base_url, "http://10.0.0.5/api");
        assert!(!config.sync.enabled);
        assert_eq!(config.sync.initial_backoff_ms, 1_000);
        assert_eq!(config.device.role, Role::Operator);
    }

    #[test]
    fn test_operator_override() {
        let device = DeviceConfig {
            operator: Some("ana".to_string()),
            role: Role::Operator,
        };
        assert_eq!(device.operator(None, None), Some(Operator::floor("ana")));
        assert_eq!(
            device.operator(Some("sam"), Some(Role::Supervisor)),
            Some(Operator::new("sam", Role::Supervisor))
        );
        assert_eq!(DeviceConfig::default().operator(None, None), None);
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stagetrack.yml");
        fs::write(&path, "device:\n  operator: luis\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.device.operator.as_deref(), Some("luis"));

        let missing = dir.path().join("missing.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }
}
