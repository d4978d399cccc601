//! Configuration management for camera-session

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::media::{FacingMode, VideoConstraints};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session timing and request defaults
    #[serde(default)]
    pub session: SessionConfig,

    /// Simulated platform used by the bundled binary
    #[serde(default)]
    pub simulator: SimulatorConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long to wait for the sink to report loaded data (ms)
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_ms: u64,

    /// Extra wait after readiness before reading device capabilities (ms).
    /// Some platforms fill in capabilities late and never say when.
    #[serde(default = "default_capability_settle")]
    pub capability_settle_ms: u64,

    /// Whether to request the torch by default
    #[serde(default)]
    pub torch: bool,

    /// Constraints used when a caller does not supply its own
    #[serde(default = "default_constraints")]
    pub default_constraints: VideoConstraints,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// User agent reported to the compatibility shim
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Whether the environment counts as a secure context
    #[serde(default = "default_true")]
    pub secure_context: bool,

    /// Whether the acquisition API exists at all
    #[serde(default = "default_true")]
    pub media_devices: bool,

    /// Whether the simulated camera has a torch
    #[serde(default = "default_true")]
    pub torch_supported: bool,

    /// Whether sinks accept a stream object directly
    #[serde(default = "default_true")]
    pub src_object_supported: bool,

    /// Whether sinks accept the vendor-prefixed stream property
    #[serde(default)]
    pub legacy_src_object_supported: bool,

    /// Whether the platform can create object URLs for streams
    #[serde(default = "default_true")]
    pub object_url_supported: bool,

    /// Whether the platform has the vendor-prefixed object URL factory
    #[serde(default)]
    pub legacy_object_url_supported: bool,

    /// Time taken to open the device (ms)
    #[serde(default = "default_acquire_latency")]
    pub acquire_latency_ms: u64,

    /// Time between play() and loaded data (ms)
    #[serde(default = "default_ready_latency")]
    pub ready_latency_ms: u64,

    /// Time between an empty reload and its error signal (ms)
    #[serde(default = "default_reload_latency")]
    pub reload_latency_ms: u64,
}

// Default value functions
fn default_readiness_timeout() -> u64 {
    6_000
}

fn default_capability_settle() -> u64 {
    500
}

fn default_constraints() -> VideoConstraints {
    VideoConstraints::facing(FacingMode::Environment)
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_acquire_latency() -> u64 {
    150
}

fn default_ready_latency() -> u64 {
    120
}

fn default_reload_latency() -> u64 {
    20
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            readiness_timeout_ms: default_readiness_timeout(),
            capability_settle_ms: default_capability_settle(),
            torch: false,
            default_constraints: default_constraints(),
        }
    }
}

impl SessionConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn capability_settle(&self) -> Duration {
        Duration::from_millis(self.capability_settle_ms)
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            secure_context: true,
            media_devices: true,
            torch_supported: true,
            src_object_supported: true,
            legacy_src_object_supported: false,
            object_url_supported: true,
            legacy_object_url_supported: false,
            acquire_latency_ms: default_acquire_latency(),
            ready_latency_ms: default_ready_latency(),
            reload_latency_ms: default_reload_latency(),
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let mut config = Config::default();
            config.config_path = Some(config_path);
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Point this config at a different file for subsequent saves
    pub fn set_config_path(&mut self, path: PathBuf) {
        self.config_path = Some(path);
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "camera-session", "session")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session.readiness_timeout(), Duration::from_millis(6000));
        assert_eq!(config.session.capability_settle(), Duration::from_millis(500));
        assert_eq!(
            config.session.default_constraints.facing_mode,
            Some(FacingMode::Environment)
        );
        assert!(!config.session.torch);
        assert!(config.simulator.secure_context);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [session]
            readiness_timeout_ms = 2500
            torch = true

            [simulator]
            torch_supported = false
            "#,
        )
        .unwrap();

        assert_eq!(config.session.readiness_timeout_ms, 2500);
        assert_eq!(config.session.capability_settle_ms, 500);
        assert!(config.session.torch);
        assert!(!config.simulator.torch_supported);
        assert_eq!(config.simulator.acquire_latency_ms, 150);
        assert!(config.simulator.object_url_supported);
        assert!(!config.simulator.legacy_src_object_supported);
        assert!(!config.simulator.legacy_object_url_supported);
    }

    #[test]
    fn test_save_and_load_from() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.session.capability_settle_ms = 750;
        config.session.default_constraints = VideoConstraints::facing(FacingMode::User);
        config.set_config_path(path.clone());
        config.save().unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.session.capability_settle_ms, 750);
        assert_eq!(
            loaded.session.default_constraints.facing_mode,
            Some(FacingMode::User)
        );
        assert_eq!(loaded.config_path().unwrap(), path);
    }

    #[test]
    fn test_load_from_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "session = 3").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
