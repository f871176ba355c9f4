//! Shared handle to the current theme.
//!
//! The editor (or the CLI) publishes whole [`ThemeSnapshot`]s; the render
//! scheduler loads the latest one each tick without locking.

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use std::path::Path;
use std::sync::Arc;
use thermal_engine_types::{
    ArcGaugeStyle, BarGaugeStyle, ChartStyle, ClockStyle, ElementKind, GaugeShape, GaugeStyle,
    Geometry, MetricKey, TextAlign, TextStyle, ThemeElement, ThemeSnapshot,
};

#[derive(Clone)]
pub struct ThemeHandle {
    current: Arc<ArcSwap<ThemeSnapshot>>,
}

impl ThemeHandle {
    pub fn new(theme: ThemeSnapshot) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(theme)),
        }
    }

    /// Replace the theme. Revisions only move forward; a snapshot that does
    /// not advance the revision is bumped past the current one.
    pub fn publish(&self, mut theme: ThemeSnapshot) -> u64 {
        let current = self.current.load();
        if theme.revision <= current.revision {
            theme.revision = current.revision + 1;
        }
        let revision = theme.revision;
        log::info!(
            "Publishing theme revision {} ({} elements)",
            revision,
            theme.elements.len()
        );
        self.current.store(Arc::new(theme));
        revision
    }

    pub fn load(&self) -> Arc<ThemeSnapshot> {
        self.current.load_full()
    }
}

impl Default for ThemeHandle {
    fn default() -> Self {
        Self::new(ThemeSnapshot::default())
    }
}

impl std::fmt::Debug for ThemeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThemeHandle")
            .field("revision", &self.current.load().revision)
            .finish()
    }
}

/// Read a theme snapshot from its JSON form
pub fn load_theme_file(path: &Path) -> Result<ThemeSnapshot> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading theme {}", path.display()))?;
    let theme: ThemeSnapshot = serde_json::from_str(&content)
        .with_context(|| format!("parsing theme {}", path.display()))?;
    log::info!(
        "Loaded theme {} ({} elements, {} bound metrics)",
        path.display(),
        theme.elements.len(),
        theme.bound_metrics().len()
    );
    Ok(theme)
}

/// Theme shown when no theme file is configured: CPU and GPU temperature
/// gauges, load bars, a clock and a CPU load chart.
pub fn builtin_theme() -> ThemeSnapshot {
    let arc = |label: &str, key: MetricKey, x: f64| {
        ThemeElement::new(
            label,
            Geometry::new(x, 40.0, 260.0, 260.0),
            ElementKind::Gauge(GaugeStyle {
                shape: GaugeShape::Arc(ArcGaugeStyle::default()),
                label: label.to_string(),
                ..GaugeStyle::default()
            }),
        )
        .with_binding(key)
    };
    let bar = |label: &str, key: MetricKey, y: f64| {
        ThemeElement::new(
            label,
            Geometry::new(640.0, y, 600.0, 36.0),
            ElementKind::Gauge(GaugeStyle {
                shape: GaugeShape::Bar(BarGaugeStyle {
                    rounded: true,
                    ..BarGaugeStyle::default()
                }),
                label: label.to_string(),
                ..GaugeStyle::default()
            }),
        )
        .with_binding(key)
    };

    let elements = vec![
        arc("CPU", MetricKey::CpuTemp, 40.0),
        arc("GPU", MetricKey::GpuTemp, 340.0),
        bar("CPU", MetricKey::CpuPercent, 60.0),
        bar("GPU", MetricKey::GpuPercent, 110.0),
        bar("RAM", MetricKey::RamPercent, 160.0),
        ThemeElement::new(
            "clock",
            Geometry::new(640.0, 220.0, 600.0, 80.0),
            ElementKind::Clock(ClockStyle::default()),
        ),
        ThemeElement::new(
            "cpu load",
            Geometry::new(40.0, 330.0, 1200.0, 120.0),
            ElementKind::Chart(ChartStyle {
                label: "CPU load".into(),
                min: Some(0.0),
                max: Some(100.0),
                ..ChartStyle::default()
            }),
        )
        .with_binding(MetricKey::CpuPercent),
        ThemeElement::new(
            "cpu clock",
            Geometry::new(40.0, 290.0, 560.0, 36.0),
            ElementKind::Text(TextStyle {
                text: "CPU clock".into(),
                font_size: 22.0,
                align: TextAlign::Center,
                ..TextStyle::default()
            }),
        )
        .with_binding(MetricKey::CpuClock),
    ];
    ThemeSnapshot::new(1, elements)
}
