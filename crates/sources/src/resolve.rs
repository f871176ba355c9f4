//! Turn a flat list of hardware readings into the engine's metric keys.
//!
//! Monitoring tools report hundreds of loosely named readings. The functions
//! here pick one value per metric using name heuristics. They are pure so
//! they can be tested against fixture reading lists.

use chrono::Utc;
use thermal_engine_types::{MetricKey, SensorSnapshot};

/// Reading category as reported by the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingKind {
    /// Type code 0 or unrecognised
    Unknown,
    Temperature,
    Voltage,
    Fan,
    Current,
    Power,
    Clock,
    Usage,
    Other,
}

impl ReadingKind {
    /// HWiNFO reading type code
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => ReadingKind::Temperature,
            2 => ReadingKind::Voltage,
            3 => ReadingKind::Fan,
            4 => ReadingKind::Current,
            5 => ReadingKind::Power,
            6 => ReadingKind::Clock,
            7 => ReadingKind::Usage,
            8 => ReadingKind::Other,
            _ => ReadingKind::Unknown,
        }
    }
}

/// One hardware reading
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    /// Name of the device the reading belongs to, e.g. `GPU [#0]: NVIDIA GeForce RTX 4080`
    pub sensor: String,
    pub label: String,
    pub unit: String,
    pub kind: ReadingKind,
    pub value: f64,
}

impl RawReading {
    pub fn new(sensor: &str, label: &str, kind: ReadingKind, value: f64) -> Self {
        Self {
            sensor: sensor.to_string(),
            label: label.to_string(),
            unit: String::new(),
            kind,
            value,
        }
    }

    fn label_lower(&self) -> String {
        self.label.to_lowercase()
    }
}

/// Substrings identifying a dedicated graphics card
const DISCRETE_GPU_MARKERS: &[&str] = &[
    "nvidia",
    "geforce",
    "rtx",
    "gtx",
    "quadro",
    "tesla",
    "radeon rx",
    "radeon pro",
    "radeon vii",
    "arc a",
    "arc b",
];

const CPU_TEMP_AGGREGATE: &[&str] = &["package", "tctl", "tdie", "cpu die"];

const CPU_CLOCK_EXCLUDE: &[&str] = &[
    "effective",
    "average",
    "avg",
    "bus",
    "ratio",
    "ring",
    "uncore",
    "l3",
    "memory",
];

pub fn is_cpu_sensor(sensor: &str) -> bool {
    let s = sensor.to_lowercase();
    s.contains("cpu") && !is_gpu_sensor(sensor)
}

pub fn is_gpu_sensor(sensor: &str) -> bool {
    let s = sensor.to_lowercase();
    s.contains("gpu") || s.contains("graphics") || is_discrete_gpu(sensor)
}

pub fn is_discrete_gpu(sensor: &str) -> bool {
    let s = sensor.to_lowercase();
    DISCRETE_GPU_MARKERS.iter().any(|m| s.contains(m))
}

/// Resolve every source key from `readings`
pub fn resolve(readings: &[RawReading]) -> SensorSnapshot {
    let now = Utc::now();
    let mut snap = SensorSnapshot::empty();
    let gpu = gpu_metrics(readings);

    let values = [
        (MetricKey::CpuTemp, cpu_temperature(readings)),
        (MetricKey::CpuClock, cpu_clock(readings)),
        (MetricKey::CpuPower, cpu_power(readings)),
        (MetricKey::GpuTemp, gpu.temperature),
        (MetricKey::GpuPercent, gpu.load),
        (MetricKey::GpuClock, gpu.clock),
        (MetricKey::GpuMemoryClock, gpu.memory_clock),
        (MetricKey::GpuMemoryPercent, gpu.memory_percent()),
        (MetricKey::GpuPower, gpu.power),
    ];
    for (key, value) in values {
        if let Some(v) = value {
            snap.set(key, v, now);
        }
    }
    snap
}

fn cpu_temp_tier(label: &str) -> Option<usize> {
    if label.contains("distance") || label.contains("tjmax") || label.contains("limit") {
        return None;
    }
    if label.contains("ccd") {
        Some(1)
    } else if CPU_TEMP_AGGREGATE.iter().any(|m| label.contains(m)) {
        Some(0)
    } else if label.contains("core") {
        Some(2)
    } else {
        Some(3)
    }
}

/// CPU temperature: the first reading of the best tier.
///
/// Tiers, best first: package/control aggregate, chiplet (CCD), any core,
/// anything else. Values are never averaged across tiers.
pub fn cpu_temperature(readings: &[RawReading]) -> Option<f64> {
    readings
        .iter()
        .filter(|r| r.kind == ReadingKind::Temperature && is_cpu_sensor(&r.sensor))
        .filter_map(|r| cpu_temp_tier(&r.label_lower()).map(|tier| (tier, r.value)))
        // min_by_key returns the first of equal keys, keeping list order within a tier
        .min_by_key(|(tier, _)| *tier)
        .map(|(_, v)| v)
}

/// CPU clock: mean of the per-core clocks, ignoring effective/average
/// readings and bus clocks.
pub fn cpu_clock(readings: &[RawReading]) -> Option<f64> {
    let cores: Vec<f64> = readings
        .iter()
        .filter(|r| r.kind == ReadingKind::Clock && is_cpu_sensor(&r.sensor))
        .filter(|r| {
            let label = r.label_lower();
            label.contains("core") && !CPU_CLOCK_EXCLUDE.iter().any(|m| label.contains(m))
        })
        .map(|r| r.value)
        .collect();
    if cores.is_empty() {
        return None;
    }
    Some(cores.iter().sum::<f64>() / cores.len() as f64)
}

/// CPU power: package-level reading preferred
pub fn cpu_power(readings: &[RawReading]) -> Option<f64> {
    let all: Vec<&RawReading> = readings
        .iter()
        .filter(|r| r.kind == ReadingKind::Power && is_cpu_sensor(&r.sensor))
        .collect();
    all.iter()
        .find(|r| {
            let label = r.label_lower();
            label.contains("package") || label.contains("ppt")
        })
        .or_else(|| all.first())
        .map(|r| r.value)
}

/// Values picked for the selected GPU
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuMetrics {
    pub device: Option<String>,
    pub discrete: bool,
    pub temperature: Option<f64>,
    pub load: Option<f64>,
    pub clock: Option<f64>,
    pub memory_clock: Option<f64>,
    pub memory_load: Option<f64>,
    pub memory_used: Option<f64>,
    pub memory_total: Option<f64>,
    pub power: Option<f64>,
    // priority of the reading currently held, lower is better
    temperature_rank: usize,
    power_rank: usize,
    load_rank: usize,
}

impl GpuMetrics {
    /// Memory load as reported, or derived from used/total
    pub fn memory_percent(&self) -> Option<f64> {
        self.memory_load.or_else(|| match (self.memory_used, self.memory_total) {
            (Some(used), Some(total)) if total > 0.0 => Some(used / total * 100.0),
            _ => None,
        })
    }

    fn offer(slot: &mut Option<f64>, rank: &mut usize, candidate_rank: usize, value: f64) {
        if slot.is_none() || candidate_rank < *rank {
            *slot = Some(value);
            *rank = candidate_rank;
        }
    }

    fn accept(&mut self, reading: &RawReading) {
        let label = reading.label_lower();
        match reading.kind {
            ReadingKind::Temperature => {
                if label.contains("memory") {
                    return;
                }
                let rank = if label.contains("hot spot")
                    || label.contains("hotspot")
                    || label.contains("junction")
                {
                    0
                } else if label.contains("core") || label.contains("die") || label.contains("gpu")
                {
                    1
                } else {
                    2
                };
                Self::offer(&mut self.temperature, &mut self.temperature_rank, rank, reading.value);
            }
            ReadingKind::Power => {
                let rank = if label.contains("package")
                    || label.contains("total")
                    || label.contains("board")
                {
                    0
                } else {
                    1
                };
                Self::offer(&mut self.power, &mut self.power_rank, rank, reading.value);
            }
            ReadingKind::Clock => {
                if label.contains("memory") {
                    self.memory_clock.get_or_insert(reading.value);
                } else if label.contains("core") || label.contains("gpu clock") || label.contains("graphics") {
                    self.clock.get_or_insert(reading.value);
                }
            }
            ReadingKind::Usage => {
                if label.contains("memory") {
                    if !label.contains("controller") {
                        self.memory_load.get_or_insert(reading.value);
                    }
                } else if label.contains("core") || label.contains("gpu") || label.contains("load") || label.contains("utilization") {
                    let rank = if label.contains("core") { 0 } else { 1 };
                    Self::offer(&mut self.load, &mut self.load_rank, rank, reading.value);
                }
            }
            ReadingKind::Other | ReadingKind::Unknown => {
                if label.contains("memory used") || label.contains("memory allocated") {
                    self.memory_used.get_or_insert(reading.value);
                } else if label.contains("memory total") || label.contains("memory size") {
                    self.memory_total.get_or_insert(reading.value);
                }
            }
            ReadingKind::Voltage | ReadingKind::Fan | ReadingKind::Current => {}
        }
    }
}

/// GPU values from the preferred GPU.
///
/// The first discrete GPU wins. Integrated GPUs are only used when no
/// discrete GPU is present; values gathered from an integrated GPU are thrown
/// away as soon as a discrete one shows up.
pub fn gpu_metrics(readings: &[RawReading]) -> GpuMetrics {
    let mut metrics = GpuMetrics::default();
    for reading in readings.iter().filter(|r| is_gpu_sensor(&r.sensor)) {
        let discrete = is_discrete_gpu(&reading.sensor);
        if metrics.discrete && !discrete {
            continue;
        }
        if discrete && !metrics.discrete {
            metrics = GpuMetrics {
                device: Some(reading.sensor.clone()),
                discrete: true,
                ..GpuMetrics::default()
            };
        }
        match &metrics.device {
            Some(device) if device != &reading.sensor => continue,
            Some(_) => {}
            None => metrics.device = Some(reading.sensor.clone()),
        }
        metrics.accept(reading);
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermal_engine_types::SensorValue;
    use ReadingKind::*;

    const CPU: &str = "CPU [#0]: Intel Core i7-13700K";
    const IGPU: &str = "GPU [#0]: Intel UHD Graphics 770";
    const DGPU: &str = "GPU [#1]: NVIDIA GeForce RTX 4080";

    #[test]
    fn test_cpu_temp_prefers_package() {
        let readings = vec![
            RawReading::new(CPU, "Core #0", Temperature, 58.0),
            RawReading::new(CPU, "Core #1", Temperature, 59.0),
            RawReading::new(CPU, "CPU Package", Temperature, 62.0),
        ];
        assert_eq!(cpu_temperature(&readings), Some(62.0));
    }

    #[test]
    fn test_cpu_temp_tiers() {
        let amd = "CPU [#0]: AMD Ryzen 9 7950X";
        let readings = vec![
            RawReading::new(amd, "CPU CCD1 (Tdie)", Temperature, 70.0),
            RawReading::new(amd, "Core #0", Temperature, 66.0),
        ];
        assert_eq!(cpu_temperature(&readings), Some(70.0));

        let readings = vec![
            RawReading::new(amd, "Core #0", Temperature, 66.0),
            RawReading::new(amd, "Core #1", Temperature, 67.0),
        ];
        assert_eq!(cpu_temperature(&readings), Some(66.0));

        let readings = vec![
            RawReading::new(amd, "Core #0 Distance to TjMAX", Temperature, 30.0),
            RawReading::new(amd, "CPU (Tctl/Tdie)", Temperature, 71.0),
        ];
        assert_eq!(cpu_temperature(&readings), Some(71.0));
    }

    #[test]
    fn test_reading_kind_codes() {
        assert_eq!(ReadingKind::from_code(1), Temperature);
        assert_eq!(ReadingKind::from_code(0), Unknown);
        assert_eq!(ReadingKind::from_code(42), Unknown);
    }

    #[test]
    fn test_cpu_temp_ignores_non_cpu_sensors() {
        let readings = vec![RawReading::new(DGPU, "GPU Temperature", Temperature, 55.0)];
        assert_eq!(cpu_temperature(&readings), None);
    }

    #[test]
    fn test_cpu_clock_excludes_effective() {
        let readings = vec![
            RawReading::new(CPU, "Core #0 Clock", Clock, 4200.0),
            RawReading::new(CPU, "Core #1 Clock", Clock, 4000.0),
            RawReading::new(CPU, "Core #0 Effective Clock", Clock, 3900.0),
            RawReading::new(CPU, "Bus Clock", Clock, 100.0),
        ];
        assert_eq!(cpu_clock(&readings), Some(4100.0));
    }

    #[test]
    fn test_cpu_power_prefers_package() {
        let readings = vec![
            RawReading::new(CPU, "IA Cores Power", Power, 80.0),
            RawReading::new(CPU, "CPU Package Power", Power, 120.0),
        ];
        assert_eq!(cpu_power(&readings), Some(120.0));

        let readings = vec![RawReading::new(CPU, "IA Cores Power", Power, 80.0)];
        assert_eq!(cpu_power(&readings), Some(80.0));
    }

    fn gpu_fixture() -> (Vec<RawReading>, Vec<RawReading>) {
        let integrated = vec![
            RawReading::new(IGPU, "GPU Temperature", Temperature, 45.0),
            RawReading::new(IGPU, "GPU Core Load", Usage, 10.0),
            RawReading::new(IGPU, "GPU Clock", Clock, 1500.0),
            RawReading::new(IGPU, "GPU Power", Power, 5.0),
        ];
        let discrete = vec![
            RawReading::new(DGPU, "GPU Temperature", Temperature, 60.0),
            RawReading::new(DGPU, "GPU Hot Spot Temperature", Temperature, 72.0),
            RawReading::new(DGPU, "GPU Memory Junction Temperature", Temperature, 80.0),
            RawReading::new(DGPU, "GPU Core Load", Usage, 55.0),
            RawReading::new(DGPU, "GPU Memory Usage", Usage, 30.0),
            RawReading::new(DGPU, "GPU Clock", Clock, 2500.0),
            RawReading::new(DGPU, "GPU Memory Clock", Clock, 1400.0),
            RawReading::new(DGPU, "GPU Core Power", Power, 150.0),
            RawReading::new(DGPU, "GPU Total Board Power", Power, 250.0),
        ];
        (integrated, discrete)
    }

    #[test]
    fn test_discrete_gpu_wins_in_any_order() {
        let (integrated, discrete) = gpu_fixture();
        let first: Vec<RawReading> = integrated.iter().chain(discrete.iter()).cloned().collect();
        let second: Vec<RawReading> = discrete.iter().chain(integrated.iter()).cloned().collect();

        for readings in [first, second] {
            let gpu = gpu_metrics(&readings);
            assert!(gpu.discrete);
            assert_eq!(gpu.device.as_deref(), Some(DGPU));
            assert_eq!(gpu.temperature, Some(72.0));
            assert_eq!(gpu.load, Some(55.0));
            assert_eq!(gpu.clock, Some(2500.0));
            assert_eq!(gpu.memory_clock, Some(1400.0));
            assert_eq!(gpu.memory_percent(), Some(30.0));
            assert_eq!(gpu.power, Some(250.0));
        }
    }

    #[test]
    fn test_integrated_gpu_used_when_alone() {
        let (integrated, _) = gpu_fixture();
        let gpu = gpu_metrics(&integrated);
        assert!(!gpu.discrete);
        assert_eq!(gpu.temperature, Some(45.0));
        assert_eq!(gpu.load, Some(10.0));
    }

    #[test]
    fn test_memory_percent_derived_from_used_and_total() {
        let readings = vec![
            RawReading::new(DGPU, "GPU Memory Used", Other, 4096.0),
            RawReading::new(DGPU, "GPU Memory Total", Other, 16384.0),
        ];
        assert_eq!(gpu_metrics(&readings).memory_percent(), Some(25.0));
    }

    #[test]
    fn test_resolve_fills_only_found_keys() {
        let mut readings = vec![RawReading::new(CPU, "CPU Package", Temperature, 62.0)];
        readings.extend(gpu_fixture().1);
        let snap = resolve(&readings);
        assert_eq!(snap.value(MetricKey::CpuTemp), SensorValue::Value(62.0));
        assert_eq!(snap.value(MetricKey::GpuTemp), SensorValue::Value(72.0));
        assert_eq!(snap.value(MetricKey::CpuClock), SensorValue::NoData);
        assert_eq!(snap.value(MetricKey::RamPercent), SensorValue::NoData);
    }
}
