//! Line protocol spoken by the sensor helper process.
//!
//! The helper writes one JSON object per line on stdout:
//!
//! * `{"status":"ready"}` once at startup
//! * `{"error":"..."}` on a fatal startup problem or a failed command
//! * a metrics object in response to `read`, with numeric fields
//!   `cpu_temp`, `cpu_clock`, `cpu_power`, `gpu_temp`, `gpu_percent`,
//!   `gpu_clock`, `gpu_memory_clock`, `gpu_memory_percent`, `gpu_power`
//!
//! Commands are written to stdin one per line: `read`, `diag`, `quit`.

use chrono::Utc;
use serde::Deserialize;
use thermal_engine_types::{MetricKey, SensorSnapshot};

pub const CMD_READ: &str = "read";
pub const CMD_DIAG: &str = "diag";
pub const CMD_QUIT: &str = "quit";
/// Terminates a `diag` response
pub const DIAG_END: &str = "END";

#[derive(Debug, Clone, PartialEq)]
pub enum HelperLine {
    Status(String),
    Error(String),
    Metrics(SensorSnapshot),
}

impl HelperLine {
    pub fn is_ready(&self) -> bool {
        matches!(self, HelperLine::Status(s) if s == "ready")
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLine {
    Error { error: String },
    Status { status: String },
    Metrics(MetricsLine),
}

/// Absent fields mean the helper could not measure that value. A reported
/// `0` is kept as a real zero.
#[derive(Debug, Default, Deserialize)]
struct MetricsLine {
    cpu_temp: Option<f64>,
    cpu_clock: Option<f64>,
    cpu_power: Option<f64>,
    gpu_temp: Option<f64>,
    gpu_percent: Option<f64>,
    gpu_clock: Option<f64>,
    gpu_memory_clock: Option<f64>,
    gpu_memory_percent: Option<f64>,
    gpu_power: Option<f64>,
}

impl MetricsLine {
    fn fields(&self) -> [(MetricKey, Option<f64>); 9] {
        [
            (MetricKey::CpuTemp, self.cpu_temp),
            (MetricKey::CpuClock, self.cpu_clock),
            (MetricKey::CpuPower, self.cpu_power),
            (MetricKey::GpuTemp, self.gpu_temp),
            (MetricKey::GpuPercent, self.gpu_percent),
            (MetricKey::GpuClock, self.gpu_clock),
            (MetricKey::GpuMemoryClock, self.gpu_memory_clock),
            (MetricKey::GpuMemoryPercent, self.gpu_memory_percent),
            (MetricKey::GpuPower, self.gpu_power),
        ]
    }
}

/// Parse one line of helper output. `Err` carries a description of why
/// the line is malformed.
pub fn parse_line(line: &str) -> Result<HelperLine, String> {
    let raw: RawLine = serde_json::from_str(line.trim())
        .map_err(|e| format!("{} in {:?}", e, truncate(line, 80)))?;
    match raw {
        RawLine::Error { error } => Ok(HelperLine::Error(error)),
        RawLine::Status { status } => Ok(HelperLine::Status(status)),
        RawLine::Metrics(metrics) => {
            let now = Utc::now();
            let mut snap = SensorSnapshot::empty();
            let mut found = 0;
            for (key, value) in metrics.fields() {
                if let Some(v) = value {
                    snap.set(key, v, now);
                    found += 1;
                }
            }
            if found == 0 {
                return Err(format!("no metric fields in {:?}", truncate(line, 80)));
            }
            Ok(HelperLine::Metrics(snap))
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermal_engine_types::SensorValue;

    #[test]
    fn test_ready_and_error_lines() {
        assert!(parse_line(r#"{"status":"ready"}"#).unwrap().is_ready());
        assert_eq!(
            parse_line(r#"{"error":"administrator rights required"}"#).unwrap(),
            HelperLine::Error("administrator rights required".into())
        );
    }

    #[test]
    fn test_metrics_line() {
        let line = r#"{"cpu_temp":62.5,"cpu_clock":4100,"cpu_power":0,"gpu_temp":55,"gpu_percent":12.5,"gpu_clock":1800,"gpu_memory_clock":7000,"gpu_memory_percent":20,"gpu_power":80}"#;
        let snap = match parse_line(line).unwrap() {
            HelperLine::Metrics(snap) => snap,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(snap.value(MetricKey::CpuTemp), SensorValue::Value(62.5));
        assert_eq!(snap.value(MetricKey::CpuClock), SensorValue::Value(4100.0));
        // zero is a real measurement
        assert_eq!(snap.value(MetricKey::CpuPower), SensorValue::Value(0.0));
        assert_eq!(snap.value(MetricKey::RamPercent), SensorValue::NoData);
    }

    #[test]
    fn test_missing_fields_are_no_data() {
        let snap = match parse_line(r#"{"cpu_temp":50}"#).unwrap() {
            HelperLine::Metrics(snap) => snap,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(snap.value(MetricKey::CpuTemp), SensorValue::Value(50.0));
        assert_eq!(snap.value(MetricKey::GpuTemp), SensorValue::NoData);
    }

    #[test]
    fn test_malformed_lines() {
        assert!(parse_line("garbage").is_err());
        assert!(parse_line(r#"{"cpu_temp":"hot"}"#).is_err());
        assert!(parse_line(r#"{"unrelated":1}"#).is_err());
        assert!(parse_line("").is_err());
    }
}
