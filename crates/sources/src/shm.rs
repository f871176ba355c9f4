//! Shared-memory sensor source.
//!
//! Attaches read-only to the region a hardware monitor (HWiNFO layout)
//! publishes and parses it on every poll. The region is packed
//! little-endian:
//!
//! ```text
//! header   signature u32 ("HWiS") | version u32 | revision u32 | poll_time u64
//!          | sensor_offset u32 | sensor_size u32 | sensor_count u32
//!          | reading_offset u32 | reading_size u32 | reading_count u32
//! sensor   id u32 | instance u32 | name_orig [128] | name_user [128]
//! reading  type u32 | sensor_index u32 | reading_id u32 | label_orig [128]
//!          | label_user [128] | unit [16] | value f64 | min f64 | max f64 | avg f64
//! ```

use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thermal_engine_core::{OpenError, PollError, SensorSource, SourceReady};
use thermal_engine_types::SensorSnapshot;
use thiserror::Error;

use crate::resolve::{self, RawReading, ReadingKind};

/// Name under which the monitor publishes its region
pub const HWINFO_REGION_NAME: &str = "HWiNFO_SENS_SM2";

pub const SIGNATURE_ACTIVE: u32 = u32::from_le_bytes(*b"HWiS");
pub const SIGNATURE_DEAD: u32 = u32::from_le_bytes(*b"DEAD");

pub const HEADER_SIZE: usize = 44;
pub const SENSOR_ELEMENT_SIZE: usize = 264;
pub const READING_ELEMENT_SIZE: usize = 316;
const STRING_LEN: usize = 128;
const UNIT_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShmLayoutError {
    #[error("region is {0} bytes, too small for the header")]
    TooSmall(usize),
    #[error("unknown region signature {0:#010x}")]
    BadSignature(u32),
    #[error("monitor has shut down its shared memory")]
    Dead,
    #[error("{section} section lies outside the region")]
    OutOfBounds { section: &'static str },
    #[error("{section} element size {size} is below the minimum {min}")]
    ElementTooSmall {
        section: &'static str,
        size: usize,
        min: usize,
    },
}

/// Parsed region header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionHeader {
    pub version: u32,
    pub revision: u32,
    pub poll_time: u64,
    pub sensor_offset: usize,
    pub sensor_size: usize,
    pub sensor_count: usize,
    pub reading_offset: usize,
    pub reading_size: usize,
    pub reading_count: usize,
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn read_f64(buf: &[u8], at: usize) -> f64 {
    f64::from_bits(read_u64(buf, at))
}

/// Nul-terminated fixed-width string
fn read_str(buf: &[u8], at: usize, len: usize) -> String {
    let raw = &buf[at..at + len];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

pub fn parse_header(buf: &[u8]) -> Result<RegionHeader, ShmLayoutError> {
    if buf.len() < HEADER_SIZE {
        return Err(ShmLayoutError::TooSmall(buf.len()));
    }
    match read_u32(buf, 0) {
        SIGNATURE_ACTIVE => {}
        SIGNATURE_DEAD => return Err(ShmLayoutError::Dead),
        other => return Err(ShmLayoutError::BadSignature(other)),
    }
    Ok(RegionHeader {
        version: read_u32(buf, 4),
        revision: read_u32(buf, 8),
        poll_time: read_u64(buf, 12),
        sensor_offset: read_u32(buf, 20) as usize,
        sensor_size: read_u32(buf, 24) as usize,
        sensor_count: read_u32(buf, 28) as usize,
        reading_offset: read_u32(buf, 32) as usize,
        reading_size: read_u32(buf, 36) as usize,
        reading_count: read_u32(buf, 40) as usize,
    })
}

fn check_section(
    buf: &[u8],
    section: &'static str,
    offset: usize,
    size: usize,
    count: usize,
    min: usize,
) -> Result<(), ShmLayoutError> {
    if count == 0 {
        return Ok(());
    }
    if size < min {
        return Err(ShmLayoutError::ElementTooSmall { section, size, min });
    }
    let end = size
        .checked_mul(count)
        .and_then(|len| len.checked_add(offset))
        .ok_or(ShmLayoutError::OutOfBounds { section })?;
    if end > buf.len() {
        return Err(ShmLayoutError::OutOfBounds { section });
    }
    Ok(())
}

/// Parse the whole region into readings, with each reading tagged by the
/// name of its sensor device.
pub fn parse_region(buf: &[u8]) -> Result<(RegionHeader, Vec<RawReading>), ShmLayoutError> {
    let header = parse_header(buf)?;
    check_section(
        buf,
        "sensor",
        header.sensor_offset,
        header.sensor_size,
        header.sensor_count,
        SENSOR_ELEMENT_SIZE,
    )?;
    check_section(
        buf,
        "reading",
        header.reading_offset,
        header.reading_size,
        header.reading_count,
        READING_ELEMENT_SIZE,
    )?;

    let sensors: Vec<String> = (0..header.sensor_count)
        .map(|i| {
            let at = header.sensor_offset + i * header.sensor_size;
            let user = read_str(buf, at + 8 + STRING_LEN, STRING_LEN);
            if user.is_empty() {
                read_str(buf, at + 8, STRING_LEN)
            } else {
                user
            }
        })
        .collect();

    let readings = (0..header.reading_count)
        .map(|i| {
            let at = header.reading_offset + i * header.reading_size;
            let kind = ReadingKind::from_code(read_u32(buf, at));
            let sensor_index = read_u32(buf, at + 4) as usize;
            let label_orig = read_str(buf, at + 12, STRING_LEN);
            let label_user = read_str(buf, at + 12 + STRING_LEN, STRING_LEN);
            let unit = read_str(buf, at + 12 + 2 * STRING_LEN, UNIT_LEN);
            let value = read_f64(buf, at + 12 + 2 * STRING_LEN + UNIT_LEN);
            RawReading {
                sensor: sensors
                    .get(sensor_index)
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string()),
                label: if label_user.is_empty() {
                    label_orig
                } else {
                    label_user
                },
                unit,
                kind,
                value,
            }
        })
        .collect();

    Ok((header, readings))
}

/// Source backed by a memory-mapped region
pub struct SharedMemorySource {
    path: PathBuf,
    staleness: Duration,
    map: Option<Mmap>,
    last_poll_time: Option<u64>,
    last_advance: Instant,
}

impl SharedMemorySource {
    pub fn new(path: impl Into<PathBuf>, staleness: Duration) -> Self {
        Self {
            path: path.into(),
            staleness,
            map: None,
            last_poll_time: None,
            last_advance: Instant::now(),
        }
    }

    /// Default location of the region on Linux
    pub fn default_path() -> PathBuf {
        Path::new("/dev/shm").join(HWINFO_REGION_NAME)
    }

    fn map_region(&self) -> Result<Mmap, OpenError> {
        let file = File::open(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => OpenError::Unavailable(format!(
                "shared region {} not found, is the monitor running?",
                self.path.display()
            )),
            _ => OpenError::Io(e),
        })?;
        // The monitor rewrites the region in place; we only ever read it and
        // validate every offset before use.
        let map = unsafe { MmapOptions::new().map(&file)? };
        Ok(map)
    }
}

impl SensorSource for SharedMemorySource {
    fn name(&self) -> &str {
        "shared-memory"
    }

    fn open(&mut self) -> Result<SourceReady, OpenError> {
        self.close();
        let map = self.map_region()?;
        let header = parse_header(&map).map_err(|e| OpenError::Unavailable(e.to_string()))?;
        log::info!(
            "Attached to {} (v{}.{})",
            self.path.display(),
            header.version,
            header.revision
        );
        self.map = Some(map);
        self.last_poll_time = None;
        self.last_advance = Instant::now();
        Ok(SourceReady {
            detail: format!(
                "shared memory {} v{}.{}",
                self.path.display(),
                header.version,
                header.revision
            ),
        })
    }

    fn poll(&mut self) -> Result<SensorSnapshot, PollError> {
        let map = self.map.as_ref().ok_or(PollError::NotOpen)?;
        if !self.path.exists() {
            return Err(PollError::Crashed(format!(
                "{} disappeared",
                self.path.display()
            )));
        }
        let (header, readings) = parse_region(map).map_err(|e| match e {
            ShmLayoutError::Dead => PollError::Crashed(e.to_string()),
            other => PollError::Malformed(other.to_string()),
        })?;

        if self.last_poll_time != Some(header.poll_time) {
            self.last_poll_time = Some(header.poll_time);
            self.last_advance = Instant::now();
        } else if self.last_advance.elapsed() > self.staleness {
            return Err(PollError::Stale);
        }

        log::trace!("Parsed {} readings from shared memory", readings.len());
        Ok(resolve::resolve(&readings))
    }

    fn diagnostics(&mut self) -> Result<String, PollError> {
        let map = self.map.as_ref().ok_or(PollError::NotOpen)?;
        let (header, readings) =
            parse_region(map).map_err(|e| PollError::Malformed(e.to_string()))?;
        let mut out = format!(
            "region {} v{}.{} poll_time={} sensors={} readings={}\n",
            self.path.display(),
            header.version,
            header.revision,
            header.poll_time,
            header.sensor_count,
            header.reading_count
        );
        for r in readings {
            out.push_str(&format!(
                "{} | {} = {} {} ({:?})\n",
                r.sensor, r.label, r.value, r.unit, r.kind
            ));
        }
        Ok(out)
    }

    fn close(&mut self) {
        if self.map.take().is_some() {
            log::debug!("Unmapped {}", self.path.display());
        }
    }
}

impl Drop for SharedMemorySource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    use super::*;

    fn put_str(buf: &mut Vec<u8>, s: &str, len: usize) {
        let mut field = vec![0u8; len];
        field[..s.len()].copy_from_slice(s.as_bytes());
        buf.extend_from_slice(&field);
    }

    /// Build a region image for tests
    pub fn build_region(
        poll_time: u64,
        sensors: &[&str],
        readings: &[(u32, u32, &str, &str, f64)],
    ) -> Vec<u8> {
        let sensor_offset = HEADER_SIZE;
        let reading_offset = sensor_offset + sensors.len() * SENSOR_ELEMENT_SIZE;

        let mut buf = Vec::new();
        buf.extend_from_slice(&SIGNATURE_ACTIVE.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&poll_time.to_le_bytes());
        for v in [
            sensor_offset,
            SENSOR_ELEMENT_SIZE,
            sensors.len(),
            reading_offset,
            READING_ELEMENT_SIZE,
            readings.len(),
        ] {
            buf.extend_from_slice(&(v as u32).to_le_bytes());
        }

        for (i, name) in sensors.iter().enumerate() {
            buf.extend_from_slice(&(i as u32).to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            put_str(&mut buf, name, STRING_LEN);
            put_str(&mut buf, "", STRING_LEN);
        }

        for (id, (kind, sensor, label, unit, value)) in readings.iter().enumerate() {
            buf.extend_from_slice(&kind.to_le_bytes());
            buf.extend_from_slice(&sensor.to_le_bytes());
            buf.extend_from_slice(&(id as u32).to_le_bytes());
            put_str(&mut buf, label, STRING_LEN);
            put_str(&mut buf, "", STRING_LEN);
            put_str(&mut buf, unit, UNIT_LEN);
            for v in [*value, *value, *value, *value] {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        buf
    }

    pub fn sample_region(poll_time: u64) -> Vec<u8> {
        build_region(
            poll_time,
            &["CPU [#0]: Intel Core i7-13700K", "GPU [#0]: NVIDIA GeForce RTX 4080"],
            &[
                (1, 0, "Core #0", "°C", 58.0),
                (1, 0, "CPU Package", "°C", 62.0),
                (6, 0, "Core #0 Clock", "MHz", 4200.0),
                (6, 0, "Core #1 Clock", "MHz", 4000.0),
                (6, 0, "Core #0 Effective Clock", "MHz", 3900.0),
                (5, 0, "CPU Package Power", "W", 95.0),
                (1, 1, "GPU Hot Spot Temperature", "°C", 71.0),
                (7, 1, "GPU Core Load", "%", 40.0),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::*;
    use super::*;
    use std::io::Write;
    use thermal_engine_types::{MetricKey, SensorValue};

    #[test]
    fn test_parse_fixture_region() {
        let region = sample_region(1);
        let (header, readings) = parse_region(&region).unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.reading_count, 8);
        assert_eq!(readings[1].label, "CPU Package");
        assert_eq!(readings[1].kind, ReadingKind::Temperature);
        assert_eq!(readings[1].unit, "°C");
        assert_eq!(readings[6].sensor, "GPU [#0]: NVIDIA GeForce RTX 4080");
    }

    #[test]
    fn test_user_label_overrides_original() {
        let mut region = sample_region(1);
        let (header, _) = parse_region(&region).unwrap();
        let user_label_at = header.reading_offset + 12 + STRING_LEN;
        region[user_label_at..user_label_at + 4].copy_from_slice(b"Hot!");
        let (_, readings) = parse_region(&region).unwrap();
        assert_eq!(readings[0].label, "Hot!");
    }

    #[test]
    fn test_truncated_region_is_rejected() {
        let region = sample_region(1);
        assert_eq!(
            parse_region(&region[..region.len() - 10]),
            Err(ShmLayoutError::OutOfBounds { section: "reading" })
        );
        assert_eq!(parse_region(&region[..10]), Err(ShmLayoutError::TooSmall(10)));
    }

    #[test]
    fn test_signatures() {
        let mut region = sample_region(1);
        region[..4].copy_from_slice(b"DEAD");
        assert_eq!(parse_header(&region), Err(ShmLayoutError::Dead));
        region[..4].copy_from_slice(b"XXXX");
        assert!(matches!(
            parse_header(&region),
            Err(ShmLayoutError::BadSignature(_))
        ));
    }

    #[test]
    fn test_source_polls_mapped_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&sample_region(1)).unwrap();
        file.flush().unwrap();

        let mut source = SharedMemorySource::new(file.path(), Duration::from_secs(10));
        source.open().unwrap();
        let snap = source.poll().unwrap();
        assert_eq!(snap.value(MetricKey::CpuTemp), SensorValue::Value(62.0));
        assert_eq!(snap.value(MetricKey::CpuClock), SensorValue::Value(4100.0));
        assert_eq!(snap.value(MetricKey::CpuPower), SensorValue::Value(95.0));
        assert_eq!(snap.value(MetricKey::GpuTemp), SensorValue::Value(71.0));
        assert_eq!(snap.value(MetricKey::GpuPercent), SensorValue::Value(40.0));
        assert!(source.diagnostics().unwrap().contains("CPU Package"));
    }

    #[test]
    fn test_frozen_poll_time_goes_stale() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&sample_region(5)).unwrap();
        file.flush().unwrap();

        let mut source = SharedMemorySource::new(file.path(), Duration::ZERO);
        source.open().unwrap();
        assert!(source.poll().is_ok());
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(source.poll(), Err(PollError::Stale)));
    }

    #[test]
    fn test_missing_region_is_unavailable() {
        let mut source = SharedMemorySource::new("/nonexistent/region", Duration::from_secs(1));
        assert!(matches!(source.open(), Err(OpenError::Unavailable(_))));
        assert!(matches!(source.poll(), Err(PollError::NotOpen)));
    }
}
