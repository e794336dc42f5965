//! TOML-based configuration persistence for the engine.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Toothlink\config.toml`
//! - Linux:    `~/.config/toothlink/config.toml`
//! - macOS:    `~/Library/Application Support/Toothlink/config.toml`
//!
//! A typical file:
//!
//! ```toml
//! [engine]
//! log_level = "debug"
//!
//! [discovery]
//! grace_seconds = 5
//! registry_capacity = 500
//!
//! [visibility]
//! max_window_seconds = 300
//!
//! [service]
//! known_index = 0
//! ```
//!
//! # Serde default values (for beginners)
//!
//! Every section and field carries a serde default, so an empty file, a
//! missing section, or a file written by an older version all load into a
//! complete `AppConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tooth_core::{ServiceId, DEFAULT_REGISTRY_CAPACITY, KNOWN_SERVICE_IDS};
use uuid::Uuid;

use crate::application::{EngineSettings, MAX_VISIBILITY_SECS};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but makes no sense.
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub visibility: VisibilitySection,
    #[serde(default)]
    pub service: ServiceSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSection {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    /// Idle seconds after a non-keep-alive scan before powering down.
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
    /// Peers kept before the registry clears itself.
    #[serde(default = "default_registry_capacity")]
    pub registry_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisibilitySection {
    /// Longest single visibility window, also the indefinite renewal period.
    #[serde(default = "default_max_window")]
    pub max_window_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    /// Index into the well-known service table.
    #[serde(default)]
    pub known_index: usize,
    /// Explicit service UUID; wins over `known_index` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_grace_seconds() -> u64 {
    5
}
fn default_registry_capacity() -> usize {
    DEFAULT_REGISTRY_CAPACITY
}
fn default_max_window() -> u32 {
    MAX_VISIBILITY_SECS
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            grace_seconds: default_grace_seconds(),
            registry_capacity: default_registry_capacity(),
        }
    }
}

impl Default for VisibilitySection {
    fn default() -> Self {
        Self {
            max_window_seconds: default_max_window(),
        }
    }
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            known_index: 0,
            uuid: None,
        }
    }
}

impl ServiceSection {
    /// Resolves the configured service id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `known_index` is outside the
    /// well-known table and no explicit UUID is set.
    pub fn service_id(&self) -> Result<ServiceId, ConfigError> {
        if let Some(uuid) = self.uuid {
            return Ok(ServiceId::new(uuid));
        }
        ServiceId::known(self.known_index).ok_or_else(|| ConfigError::Invalid {
            field: "service.known_index",
            reason: format!(
                "{} is outside the table of {} known services",
                self.known_index,
                KNOWN_SERVICE_IDS.len()
            ),
        })
    }
}

impl AppConfig {
    /// Converts the file representation into engine tunables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero capacity, a zero
    /// visibility window, or an unknown service index.
    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigError> {
        if self.discovery.registry_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "discovery.registry_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.visibility.max_window_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "visibility.max_window_seconds",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(EngineSettings {
            grace_period: Duration::from_secs(self.discovery.grace_seconds),
            max_visibility: Duration::from_secs(u64::from(self.visibility.max_window_seconds)),
            registry_capacity: self.discovery.registry_capacity,
            default_service: self.service.service_id()?,
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to the platform config file.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `Toothlink`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Toothlink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("toothlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Toothlink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("toothlink_test_{}", Uuid::new_v4()))
    }

    #[test]
    fn test_default_config_matches_engine_defaults() {
        // Arrange / Act
        let settings = AppConfig::default().engine_settings().unwrap();

        // Assert
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.engine.log_level, "info");
    }

    #[test]
    fn test_partial_section_overrides_only_named_fields() {
        // Arrange
        let toml_str = r#"
[discovery]
grace_seconds = 2
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.discovery.grace_seconds, 2);
        assert_eq!(cfg.discovery.registry_capacity, 500);
        assert_eq!(cfg.visibility.max_window_seconds, 300);
    }

    #[test]
    fn test_explicit_uuid_wins_over_index() {
        let uuid = Uuid::new_v4();
        let section = ServiceSection {
            known_index: 3,
            uuid: Some(uuid),
        };
        assert_eq!(section.service_id().unwrap(), ServiceId::new(uuid));
    }

    #[test]
    fn test_unknown_index_is_invalid() {
        let mut cfg = AppConfig::default();
        cfg.service.known_index = 99;

        let err = cfg.engine_settings().unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "service.known_index",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_capacity_is_invalid() {
        let mut cfg = AppConfig::default();
        cfg.discovery.registry_capacity = 0;
        assert!(cfg.engine_settings().is_err());
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        // Arrange
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        // Act
        let result = load_config_from(&path);

        // Assert
        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let path = temp_dir().join("config.toml");
        assert_eq!(load_config_from(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip_via_temp_dir() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.engine.log_level = "debug".to_string();
        cfg.service.known_index = 2;

        // Act
        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);
        assert_eq!(
            loaded.engine_settings().unwrap().default_service,
            ServiceId::known(2).unwrap()
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_absent_uuid_is_not_serialized() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).unwrap();
        assert!(!toml_str.contains("uuid"));
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"), "got {path:?}");
        }
    }
}
