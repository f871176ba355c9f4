//! Application configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thermal_engine_core::{DEFAULT_TARGET_FPS, MAX_TARGET_FPS};
use thermal_engine_device::LinkConfig;
use thermal_engine_sources::SourceConfig;

const CONFIG_VERSION: u32 = 1;

/// Application-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Version of the config format
    #[serde(default = "default_version")]
    pub version: u32,
    /// Sensor adapter and polling
    #[serde(default)]
    pub sensors: SourceConfig,
    /// Panel selection and reconnect policy
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl AppConfig {
    /// Load configuration from the user config directory. A missing file
    /// gives the defaults.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            log::info!("No config at {}, using defaults", config_path.display());
            return Ok(Self::default());
        }

        Self::load_from_path(&config_path)
    }

    /// Save configuration to the user config directory
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_path()?)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("org", "thermal-engine", "thermal-engine")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(dirs.config_dir().join("config.json"))
    }

    /// Load configuration from a specific file path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        if config.version > CONFIG_VERSION {
            log::warn!(
                "Config {} has version {}, newer than supported {}",
                path.display(),
                config.version,
                CONFIG_VERSION
            );
        }
        Ok(config)
    }

    /// Save configuration to a specific file path
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            sensors: SourceConfig::default(),
            device: DeviceConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

/// Device configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(flatten)]
    pub link: LinkConfig,
    /// Stream to the in-process virtual panel instead of USB
    #[serde(default)]
    pub virtual_panel: bool,
}

/// Render configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    /// Theme JSON loaded at startup
    #[serde(default)]
    pub theme: Option<PathBuf>,
}

fn default_target_fps() -> u32 {
    DEFAULT_TARGET_FPS
}

impl RenderConfig {
    /// Target frame rate clamped to the supported range
    pub fn clamped_fps(&self) -> u32 {
        self.target_fps.clamp(1, MAX_TARGET_FPS)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            theme: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermal_engine_sources::SourceBackend;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.render.target_fps, 10);
        assert!(!config.device.virtual_panel);
    }

    #[test]
    fn test_partial_sections() {
        let json = r#"{
            "sensors": {"backend": "shared_memory"},
            "device": {"virtual_panel": true, "preferred": "0416:5302"},
            "render": {"target_fps": 90}
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sensors.backend, SourceBackend::SharedMemory);
        assert!(config.device.virtual_panel);
        assert_eq!(config.device.link.preferred.map(|d| d.product_id), Some(0x5302));
        assert_eq!(config.render.clamped_fps(), 60);
    }

    #[test]
    fn test_save_and_load_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.render.target_fps = 24;
        config.save_to_path(&path).unwrap();
        assert_eq!(AppConfig::load_from_path(&path).unwrap(), config);
    }

    #[test]
    fn test_load_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = AppConfig::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }
}
