//! Metric keys, sensor values and whole-system sensor snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of metrics the engine publishes.
///
/// The discriminant doubles as the index into [`SensorSnapshot`], so the
/// order of variants must match [`MetricKey::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    CpuPercent,
    CpuTemp,
    CpuClock,
    CpuPower,
    GpuPercent,
    GpuTemp,
    GpuClock,
    GpuMemoryClock,
    GpuMemoryPercent,
    GpuPower,
    RamPercent,
    NetUpload,
    NetDownload,
}

impl MetricKey {
    pub const COUNT: usize = 13;

    pub const ALL: [MetricKey; MetricKey::COUNT] = [
        MetricKey::CpuPercent,
        MetricKey::CpuTemp,
        MetricKey::CpuClock,
        MetricKey::CpuPower,
        MetricKey::GpuPercent,
        MetricKey::GpuTemp,
        MetricKey::GpuClock,
        MetricKey::GpuMemoryClock,
        MetricKey::GpuMemoryPercent,
        MetricKey::GpuPower,
        MetricKey::RamPercent,
        MetricKey::NetUpload,
        MetricKey::NetDownload,
    ];

    /// Keys reported by the external monitoring source
    pub const SOURCE_KEYS: [MetricKey; 9] = [
        MetricKey::CpuTemp,
        MetricKey::CpuClock,
        MetricKey::CpuPower,
        MetricKey::GpuTemp,
        MetricKey::GpuPercent,
        MetricKey::GpuClock,
        MetricKey::GpuMemoryClock,
        MetricKey::GpuMemoryPercent,
        MetricKey::GpuPower,
    ];

    /// Keys sampled from the host OS directly
    pub const HOST_KEYS: [MetricKey; 4] = [
        MetricKey::CpuPercent,
        MetricKey::RamPercent,
        MetricKey::NetUpload,
        MetricKey::NetDownload,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKey::CpuPercent => "cpu_percent",
            MetricKey::CpuTemp => "cpu_temp",
            MetricKey::CpuClock => "cpu_clock",
            MetricKey::CpuPower => "cpu_power",
            MetricKey::GpuPercent => "gpu_percent",
            MetricKey::GpuTemp => "gpu_temp",
            MetricKey::GpuClock => "gpu_clock",
            MetricKey::GpuMemoryClock => "gpu_memory_clock",
            MetricKey::GpuMemoryPercent => "gpu_memory_percent",
            MetricKey::GpuPower => "gpu_power",
            MetricKey::RamPercent => "ram_percent",
            MetricKey::NetUpload => "net_upload",
            MetricKey::NetDownload => "net_download",
        }
    }

    /// Human readable name for labels
    pub fn display_name(self) -> &'static str {
        match self {
            MetricKey::CpuPercent => "CPU Load",
            MetricKey::CpuTemp => "CPU Temperature",
            MetricKey::CpuClock => "CPU Clock Speed",
            MetricKey::CpuPower => "CPU Power",
            MetricKey::GpuPercent => "GPU Load",
            MetricKey::GpuTemp => "GPU Temperature",
            MetricKey::GpuClock => "GPU Clock Speed",
            MetricKey::GpuMemoryClock => "GPU Memory Clock",
            MetricKey::GpuMemoryPercent => "GPU Memory",
            MetricKey::GpuPower => "GPU Power",
            MetricKey::RamPercent => "RAM Usage",
            MetricKey::NetUpload => "Upload Speed",
            MetricKey::NetDownload => "Download Speed",
        }
    }

    pub fn unit(self) -> UnitKind {
        match self {
            MetricKey::CpuTemp | MetricKey::GpuTemp => UnitKind::Temperature,
            MetricKey::CpuClock | MetricKey::GpuClock | MetricKey::GpuMemoryClock => {
                UnitKind::Clock
            }
            MetricKey::CpuPower | MetricKey::GpuPower => UnitKind::Power,
            MetricKey::NetUpload | MetricKey::NetDownload => UnitKind::Speed,
            MetricKey::CpuPercent
            | MetricKey::GpuPercent
            | MetricKey::GpuMemoryPercent
            | MetricKey::RamPercent => UnitKind::Percent,
        }
    }

    pub fn is_host_metric(self) -> bool {
        Self::HOST_KEYS.contains(&self)
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown metric key '{}'", s))
    }
}

/// Unit family of a metric, used for formatting and default thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Percent,
    Temperature,
    Clock,
    Power,
    Speed,
}

impl UnitKind {
    pub fn symbol(self) -> &'static str {
        match self {
            UnitKind::Percent => "%",
            UnitKind::Temperature => "°C",
            UnitKind::Clock => "MHz",
            UnitKind::Power => "W",
            UnitKind::Speed => "MB/s",
        }
    }

    pub fn decimals(self) -> usize {
        match self {
            UnitKind::Speed => 1,
            _ => 0,
        }
    }

    /// Format a value with this unit's precision and symbol, e.g. `62°C`
    pub fn format(self, value: f64) -> String {
        format!("{:.*}{}", self.decimals(), value, self.symbol())
    }
}

/// A single metric value. `NoData` means the source is not reporting it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorValue {
    Value(f64),
    #[default]
    NoData,
}

impl SensorValue {
    pub fn value(self) -> Option<f64> {
        match self {
            SensorValue::Value(v) => Some(v),
            SensorValue::NoData => None,
        }
    }

    pub fn is_no_data(self) -> bool {
        matches!(self, SensorValue::NoData)
    }

    /// Value to draw with; `NoData` renders as the idle presentation
    pub fn or_zero(self) -> f64 {
        self.value().unwrap_or(0.0)
    }
}

impl From<Option<f64>> for SensorValue {
    fn from(v: Option<f64>) -> Self {
        match v {
            Some(v) if v.is_finite() => SensorValue::Value(v),
            _ => SensorValue::NoData,
        }
    }
}

/// Value of one metric together with when it was observed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: SensorValue,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Reading {
    pub const NO_DATA: Reading = Reading {
        value: SensorValue::NoData,
        timestamp: None,
    };

    pub fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: SensorValue::from(Some(value)),
            timestamp: Some(timestamp),
        }
    }
}

impl Default for Reading {
    fn default() -> Self {
        Self::NO_DATA
    }
}

/// One reading per [`MetricKey`]. Every key is always present.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSnapshot {
    readings: [Reading; MetricKey::COUNT],
}

impl SensorSnapshot {
    /// All keys `NoData`
    pub fn empty() -> Self {
        Self {
            readings: [Reading::NO_DATA; MetricKey::COUNT],
        }
    }

    pub fn get(&self, key: MetricKey) -> Reading {
        self.readings[key.index()]
    }

    pub fn value(&self, key: MetricKey) -> SensorValue {
        self.readings[key.index()].value
    }

    pub fn set(&mut self, key: MetricKey, value: f64, timestamp: DateTime<Utc>) {
        self.readings[key.index()] = Reading::new(value, timestamp);
    }

    pub fn clear(&mut self, key: MetricKey) {
        self.readings[key.index()] = Reading::NO_DATA;
    }

    /// Copy every key of `other` that carries a value
    pub fn merge(&mut self, other: &SensorSnapshot) {
        for key in MetricKey::ALL {
            let reading = other.get(key);
            if !reading.value.is_no_data() {
                self.readings[key.index()] = reading;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricKey, Reading)> + '_ {
        MetricKey::ALL.iter().map(move |k| (*k, self.get(*k)))
    }

    pub fn has_any_value(&self) -> bool {
        self.readings.iter().any(|r| !r.value.is_no_data())
    }
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
