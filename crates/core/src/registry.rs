//! Sensor registry: the one place current metric values live.
//!
//! [`SensorRegistry::new`] hands out a single [`RegistryWriter`] (owned by
//! the sensor bridge) and a cloneable [`RegistryReader`]. Every write builds
//! a fresh [`RegistrySnapshot`] and swaps it in atomically, so readers never
//! see a half-updated set of values and never block the writer.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use thermal_engine_types::{MetricKey, SensorSnapshot, SensorValue};

use crate::constants::SMOOTHING_WINDOW;

/// Consistent view of every metric at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySnapshot {
    /// Incremented on every write
    pub sequence: u64,
    /// Last sample per metric
    pub raw: SensorSnapshot,
    /// Rolling mean of the last samples per metric
    pub smoothed: SensorSnapshot,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RegistrySnapshot {
    pub fn empty() -> Self {
        Self {
            sequence: 0,
            raw: SensorSnapshot::empty(),
            smoothed: SensorSnapshot::empty(),
            updated_at: None,
        }
    }

    /// Smoothed value, what display elements show
    pub fn get(&self, key: MetricKey) -> SensorValue {
        self.smoothed.value(key)
    }

    pub fn get_raw(&self, key: MetricKey) -> SensorValue {
        self.raw.value(key)
    }
}

impl Default for RegistrySnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

pub struct SensorRegistry;

impl SensorRegistry {
    /// Create a registry with the default smoothing window
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (RegistryWriter, RegistryReader) {
        Self::with_window(SMOOTHING_WINDOW)
    }

    pub fn with_window(window: usize) -> (RegistryWriter, RegistryReader) {
        let shared = Arc::new(ArcSwap::from_pointee(RegistrySnapshot::empty()));
        let writer = RegistryWriter {
            shared: Arc::clone(&shared),
            window: window.max(1),
            samples: std::array::from_fn(|_| VecDeque::with_capacity(window.max(1))),
            current: RegistrySnapshot::empty(),
        };
        (writer, RegistryReader { shared })
    }
}

/// The single mutator of the registry. Deliberately not `Clone`.
pub struct RegistryWriter {
    shared: Arc<ArcSwap<RegistrySnapshot>>,
    window: usize,
    samples: [VecDeque<f64>; MetricKey::COUNT],
    current: RegistrySnapshot,
}

impl RegistryWriter {
    /// Apply a poll result.
    ///
    /// Keys in `scope` are updated from `update`: a value is pushed into the
    /// smoothing window, `NoData` clears the key. Keys outside `scope` keep
    /// their previous values.
    pub fn publish(&mut self, update: &SensorSnapshot, scope: &[MetricKey]) {
        let now = Utc::now();
        for &key in scope {
            let reading = update.get(key);
            match reading.value {
                SensorValue::Value(v) => {
                    let window = &mut self.samples[key.index()];
                    if window.len() == self.window {
                        window.pop_front();
                    }
                    window.push_back(v);
                    let mean = window.iter().sum::<f64>() / window.len() as f64;
                    let ts = reading.timestamp.unwrap_or(now);
                    self.current.raw.set(key, v, ts);
                    self.current.smoothed.set(key, mean, ts);
                }
                SensorValue::NoData => self.clear_key(key),
            }
        }
        self.current.updated_at = Some(now);
        self.commit();
    }

    /// Set `keys` to `NoData` and forget their smoothing history
    pub fn mark_stale(&mut self, keys: &[MetricKey]) {
        for &key in keys {
            self.clear_key(key);
        }
        self.commit();
    }

    pub fn reader(&self) -> RegistryReader {
        RegistryReader {
            shared: Arc::clone(&self.shared),
        }
    }

    fn clear_key(&mut self, key: MetricKey) {
        self.samples[key.index()].clear();
        self.current.raw.clear(key);
        self.current.smoothed.clear(key);
    }

    fn commit(&mut self) {
        self.current.sequence += 1;
        self.shared.store(Arc::new(self.current.clone()));
    }
}

/// Cheap, cloneable read handle
#[derive(Clone)]
pub struct RegistryReader {
    shared: Arc<ArcSwap<RegistrySnapshot>>,
}

impl RegistryReader {
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.shared.load_full()
    }

    pub fn get(&self, key: MetricKey) -> SensorValue {
        self.shared.load().get(key)
    }

    pub fn get_raw(&self, key: MetricKey) -> SensorValue {
        self.shared.load().get_raw(key)
    }

    pub fn sequence(&self) -> u64 {
        self.shared.load().sequence
    }
}

impl std::fmt::Debug for RegistryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryReader")
            .field("sequence", &self.sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn snapshot_with(key: MetricKey, value: f64) -> SensorSnapshot {
        let mut snap = SensorSnapshot::empty();
        snap.set(key, value, Utc::now());
        snap
    }

    #[test]
    fn test_fresh_registry_reports_no_data() {
        let (_writer, reader) = SensorRegistry::new();
        for key in MetricKey::ALL {
            assert_eq!(reader.get(key), SensorValue::NoData);
            assert_eq!(reader.get_raw(key), SensorValue::NoData);
        }
        assert_eq!(reader.sequence(), 0);
    }

    #[test]
    fn test_smoothing_over_window() {
        let (mut writer, reader) = SensorRegistry::new();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0] {
            writer.publish(&snapshot_with(MetricKey::CpuTemp, v), &[MetricKey::CpuTemp]);
        }
        // window of 5 holds 20..=60
        assert_eq!(reader.get(MetricKey::CpuTemp), SensorValue::Value(40.0));
        assert_eq!(reader.get_raw(MetricKey::CpuTemp), SensorValue::Value(60.0));
        assert_eq!(reader.sequence(), 6);
    }

    #[test]
    fn test_keys_outside_scope_are_untouched() {
        let (mut writer, reader) = SensorRegistry::new();
        writer.publish(&snapshot_with(MetricKey::GpuTemp, 70.0), &[MetricKey::GpuTemp]);
        writer.publish(
            &snapshot_with(MetricKey::RamPercent, 33.0),
            &[MetricKey::RamPercent],
        );
        assert_eq!(reader.get(MetricKey::GpuTemp), SensorValue::Value(70.0));
        assert_eq!(reader.get(MetricKey::RamPercent), SensorValue::Value(33.0));
    }

    #[test]
    fn test_no_data_in_scope_clears_key() {
        let (mut writer, reader) = SensorRegistry::new();
        writer.publish(&snapshot_with(MetricKey::GpuTemp, 70.0), &[MetricKey::GpuTemp]);
        writer.publish(&SensorSnapshot::empty(), &[MetricKey::GpuTemp]);
        assert_eq!(reader.get(MetricKey::GpuTemp), SensorValue::NoData);
    }

    #[test]
    fn test_mark_stale_resets_window() {
        let (mut writer, reader) = SensorRegistry::new();
        writer.publish(&snapshot_with(MetricKey::CpuTemp, 90.0), &[MetricKey::CpuTemp]);
        writer.mark_stale(&MetricKey::SOURCE_KEYS);
        assert_eq!(reader.get(MetricKey::CpuTemp), SensorValue::NoData);

        writer.publish(&snapshot_with(MetricKey::CpuTemp, 50.0), &[MetricKey::CpuTemp]);
        // old 90 must not leak into the new average
        assert_eq!(reader.get(MetricKey::CpuTemp), SensorValue::Value(50.0));
    }

    #[test]
    fn test_readers_always_see_consistent_snapshots() {
        let (mut writer, reader) = SensorRegistry::new();
        let keys = [MetricKey::CpuTemp, MetricKey::GpuTemp];

        let handle = thread::spawn(move || {
            for _ in 0..2000 {
                let snap = reader.snapshot();
                // both keys are always written together with equal values
                assert_eq!(snap.get_raw(MetricKey::CpuTemp), snap.get_raw(MetricKey::GpuTemp));
            }
        });

        for i in 0..2000 {
            let mut update = SensorSnapshot::empty();
            let now = Utc::now();
            update.set(MetricKey::CpuTemp, i as f64, now);
            update.set(MetricKey::GpuTemp, i as f64, now);
            writer.publish(&update, &keys);
        }
        handle.join().unwrap();
    }
}
