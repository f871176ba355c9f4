//! Engine lifecycle: wires the sensor bridge, device link and render
//! scheduler together and tears them down in order.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use thermal_engine_core::{PollError, RegistryReader, SensorRegistry, SourceFactory, StatusCell};
use thermal_engine_device::{DeviceLink, LinkStats, Transport, VirtualPanel};
use thermal_engine_render::PainterRegistry;
use thermal_engine_sources::{HostMetrics, SensorBridge};
use thermal_engine_types::ThemeSnapshot;

use super::scheduler::{RenderScheduler, SchedulerStats};
use super::theme_handle::ThemeHandle;
use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineStats {
    pub render: SchedulerStats,
    pub device: LinkStats,
}

/// Everything the engine needs besides configuration. Tests swap in fakes.
pub struct EngineParts {
    pub sources: SourceFactory,
    pub host: Option<HostMetrics>,
    pub transport: Box<dyn Transport>,
}

impl EngineParts {
    /// Adapter and transport as configured
    pub fn from_config(config: &AppConfig) -> Result<(Self, Option<VirtualPanel>)> {
        let (transport, virtual_panel) = open_transport(config)?;
        Ok((
            Self {
                sources: config.sensors.source_factory(),
                host: config.sensors.build_host_metrics(),
                transport,
            },
            virtual_panel,
        ))
    }
}

fn open_transport(config: &AppConfig) -> Result<(Box<dyn Transport>, Option<VirtualPanel>)> {
    if config.device.virtual_panel {
        log::info!("Streaming to the virtual panel");
        let panel = VirtualPanel::new();
        return Ok((Box::new(panel.transport()), Some(panel)));
    }
    #[cfg(feature = "hid")]
    {
        let transport = thermal_engine_device::HidTransport::new().context("initializing hidapi")?;
        Ok((Box::new(transport), None))
    }
    #[cfg(not(feature = "hid"))]
    {
        anyhow::bail!("built without USB HID support; use the virtual panel")
    }
}

pub struct Engine {
    scheduler: RenderScheduler,
    link: DeviceLink,
    bridge: SensorBridge,
    registry: RegistryReader,
    theme: ThemeHandle,
    virtual_panel: Option<VirtualPanel>,
    stopped: bool,
}

impl Engine {
    /// Start everything from the application config
    pub fn start(config: &AppConfig, theme: ThemeSnapshot) -> Result<Self> {
        let (parts, virtual_panel) = EngineParts::from_config(config)?;
        let mut engine = Self::start_with(config, parts, theme, PainterRegistry::new())?;
        engine.virtual_panel = virtual_panel;
        Ok(engine)
    }

    pub fn start_with(
        config: &AppConfig,
        parts: EngineParts,
        theme: ThemeSnapshot,
        painters: PainterRegistry,
    ) -> Result<Self> {
        log::warn!("=== Starting Thermal Engine v{} ===", env!("CARGO_PKG_VERSION"));

        let (writer, registry) = SensorRegistry::new();
        let theme = ThemeHandle::new(theme);

        let bridge = SensorBridge::start(parts.sources, writer, parts.host, config.sensors.bridge.clone())
            .context("starting sensor bridge")?;
        let link = DeviceLink::start(parts.transport, config.device.link.clone())
            .context("starting device link")?;
        let scheduler = RenderScheduler::start(
            theme.clone(),
            registry.clone(),
            Box::new(link.submitter()),
            painters,
            config.render.clamped_fps(),
        )
        .context("starting render scheduler")?;

        Ok(Self {
            scheduler,
            link,
            bridge,
            registry,
            theme,
            virtual_panel: None,
            stopped: false,
        })
    }

    pub fn publish_theme(&self, theme: ThemeSnapshot) -> u64 {
        self.theme.publish(theme)
    }

    pub fn theme(&self) -> &ThemeHandle {
        &self.theme
    }

    pub fn registry(&self) -> &RegistryReader {
        &self.registry
    }

    pub fn sensor_status(&self) -> Arc<StatusCell> {
        self.bridge.status()
    }

    pub fn device_status(&self) -> Arc<StatusCell> {
        self.link.status()
    }

    pub fn virtual_panel(&self) -> Option<&VirtualPanel> {
        self.virtual_panel.as_ref()
    }

    /// Stop rendering; sensors keep polling
    pub fn pause(&self) {
        self.scheduler.pause();
    }

    pub fn resume(&self) {
        self.scheduler.resume();
    }

    pub fn set_target_fps(&self, fps: u32) {
        self.scheduler.set_target_fps(fps);
    }

    /// Retry the sensor source after a startup failure
    pub fn reconnect_sensors(&self) {
        self.bridge.reconnect();
    }

    /// Diagnostic dump from the connected sensor source
    pub fn sensor_diagnostics(&self, timeout: Duration) -> Result<String, PollError> {
        self.bridge.diagnostics(timeout)
    }

    /// The system woke from sleep; restart the source and reopen the panel
    pub fn notify_resume(&self) {
        self.bridge.notify_resume();
        self.link.notify_resume();
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            render: self.scheduler.stats(),
            device: self.link.stats(),
        }
    }

    /// Stop rendering first, then release the panel, then the source
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        log::warn!("=== Shutting down ===");
        self.scheduler.shutdown();
        self.link.shutdown();
        self.bridge.shutdown();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
