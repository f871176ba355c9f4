//! Host metrics read straight from the OS: CPU load, RAM usage and network
//! throughput. These keys are not reported by the external monitor.

use chrono::Utc;
use std::time::Instant;
use sysinfo::{CpuRefreshKind, Networks, RefreshKind, System};
use thermal_engine_core::BYTES_PER_MB;
use thermal_engine_types::{MetricKey, SensorSnapshot};

pub struct HostMetrics {
    system: System,
    networks: Networks,
    /// (received, transmitted, when) at the previous sample
    last_net: Option<(u64, u64, Instant)>,
}

impl HostMetrics {
    pub fn new() -> Self {
        let mut system = System::new_with_specifics(
            RefreshKind::new().with_cpu(CpuRefreshKind::everything()),
        );
        // CPU usage is a delta between refreshes; prime the first one
        system.refresh_cpu_all();
        Self {
            system,
            networks: Networks::new_with_refreshed_list(),
            last_net: None,
        }
    }

    /// Sample every host key. Keys without a baseline yet are `NoData`.
    pub fn sample(&mut self) -> SensorSnapshot {
        let now = Utc::now();
        let mut snap = SensorSnapshot::empty();

        self.system.refresh_cpu_all();
        let cpu = self.system.global_cpu_usage() as f64;
        snap.set(MetricKey::CpuPercent, cpu.clamp(0.0, 100.0), now);

        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total > 0 {
            let used = self.system.used_memory() as f64 / total as f64 * 100.0;
            snap.set(MetricKey::RamPercent, used, now);
        }

        self.networks.refresh();
        let (received, transmitted) = self
            .networks
            .values()
            .fold((0u64, 0u64), |(rx, tx), data| {
                (rx + data.total_received(), tx + data.total_transmitted())
            });
        let sampled_at = Instant::now();
        if let Some((last_rx, last_tx, last_at)) = self.last_net {
            let secs = sampled_at.duration_since(last_at).as_secs_f64();
            if secs > 0.0 {
                let down = received.saturating_sub(last_rx) as f64 / secs / BYTES_PER_MB;
                let up = transmitted.saturating_sub(last_tx) as f64 / secs / BYTES_PER_MB;
                snap.set(MetricKey::NetDownload, down, now);
                snap.set(MetricKey::NetUpload, up, now);
            }
        }
        self.last_net = Some((received, transmitted, sampled_at));

        log::trace!(
            "Host sample: cpu={:.1}% ram={:?}",
            cpu,
            snap.value(MetricKey::RamPercent)
        );
        snap
    }
}

impl Default for HostMetrics {
    fn default() -> Self {
        Self::new()
    }
}
