//! thermal-engine-sources: Sensor source adapters and the polling bridge.
//!
//! Two adapters read the external hardware monitor: a helper process that
//! speaks a JSON line protocol, and a reader for the monitor's
//! shared-memory region. Host metrics (CPU load, RAM, network) come from the
//! OS directly. The [`SensorBridge`] drives one adapter on its own thread and
//! feeds the registry.

mod bridge;
pub mod helper;
mod host;
pub mod protocol;
pub mod resolve;
pub mod shm;

pub use bridge::{BridgeConfig, SensorBridge};
pub use helper::{HelperConfig, HelperProcessSource, HELPER_EXECUTABLE};
pub use host::HostMetrics;
pub use shm::{SharedMemorySource, ShmLayoutError};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thermal_engine_core::{BoxedSensorSource, SourceFactory};

/// Which adapter reads the hardware monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceBackend {
    #[default]
    Helper,
    SharedMemory,
}

impl std::str::FromStr for SourceBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "helper" => Ok(SourceBackend::Helper),
            "shm" | "shared_memory" | "shared-memory" => Ok(SourceBackend::SharedMemory),
            other => Err(format!("unknown sensor backend '{}'", other)),
        }
    }
}

/// Adapter selection plus per-adapter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub backend: SourceBackend,
    #[serde(default)]
    pub helper: HelperConfig,
    /// Shared-memory region path; the platform default when unset
    #[serde(default)]
    pub shm_path: Option<PathBuf>,
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Sample CPU load, RAM and network from the OS
    #[serde(default = "default_true")]
    pub host_metrics: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            backend: SourceBackend::default(),
            helper: HelperConfig::default(),
            shm_path: None,
            bridge: BridgeConfig::default(),
            host_metrics: true,
        }
    }
}

impl SourceConfig {
    /// Build the configured adapter. Nothing is opened yet.
    pub fn build_source(&self) -> BoxedSensorSource {
        match self.backend {
            SourceBackend::Helper => {
                log::info!("Using sensor helper process");
                Box::new(HelperProcessSource::new(self.helper.clone()))
            }
            SourceBackend::SharedMemory => {
                let path = self
                    .shm_path
                    .clone()
                    .unwrap_or_else(SharedMemorySource::default_path);
                log::info!("Using shared-memory sensor region at {}", path.display());
                Box::new(SharedMemorySource::new(path, self.bridge.staleness()))
            }
        }
    }

    /// Factory the bridge uses to build a fresh adapter per session
    pub fn source_factory(&self) -> SourceFactory {
        let config = self.clone();
        Box::new(move || config.build_source())
    }

    pub fn build_host_metrics(&self) -> Option<HostMetrics> {
        self.host_metrics.then(HostMetrics::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("helper".parse(), Ok(SourceBackend::Helper));
        assert_eq!("SHM".parse(), Ok(SourceBackend::SharedMemory));
        assert!("wmi".parse::<SourceBackend>().is_err());
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: SourceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.backend, SourceBackend::Helper);
        assert!(config.host_metrics);
        assert_eq!(config.bridge, BridgeConfig::default());
    }

    #[test]
    fn test_build_source_names() {
        let mut config = SourceConfig::default();
        assert_eq!(config.build_source().name(), "helper-process");
        config.backend = SourceBackend::SharedMemory;
        assert_eq!(config.build_source().name(), "shared-memory");

        let mut factory = config.source_factory();
        assert_eq!(factory().name(), "shared-memory");
    }
}
