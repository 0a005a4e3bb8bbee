//! System performance monitoring
//!
//! Periodic sampler feeding the monitoring UI: smoothed CPU, memory,
//! network throughput from interface counters, and copy throughput
//! derived from the engine's byte counters (the service is the only
//! meaningful disk writer on a capture offload box).

use crate::config::MonitoringSettings;
use crate::disk;
use crate::engine::SyncEngine;
use crate::models::PerformanceMetrics;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use sysinfo::{Networks, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    settings: MonitoringSettings,
    engine: SyncEngine,
    metrics: Mutex<PerformanceMetrics>,
}

impl Monitor {
    pub fn new(settings: MonitoringSettings, engine: SyncEngine) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                settings,
                engine,
                metrics: Mutex::new(PerformanceMetrics::default()),
            }),
        }
    }

    /// Launch the sampling loop; it runs until `token` fires.
    pub fn spawn(&self, token: CancellationToken) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(sample_loop(inner, token))
    }

    /// Most recent sample.
    pub fn metrics(&self) -> PerformanceMetrics {
        self.inner.metrics.lock().clone()
    }
}

async fn sample_loop(inner: Arc<MonitorInner>, token: CancellationToken) {
    let interval = inner.settings.performance_update_interval();
    let secs = interval.as_secs_f64();
    let window = inner.settings.cpu_smoothing_samples.max(1);

    let mut ticker = tokio::time::interval(interval);
    let mut sys = System::new();
    let mut networks = Networks::new_with_refreshed_list();
    let mut cpu_window: VecDeque<f64> = VecDeque::with_capacity(window);
    let mut prev_copied: u64 = 0;

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        sys.refresh_cpu_usage();
        sys.refresh_memory();
        networks.refresh();

        cpu_window.push_back(sys.global_cpu_info().cpu_usage() as f64);
        while cpu_window.len() > window {
            cpu_window.pop_front();
        }
        let cpu_percent = cpu_window.iter().sum::<f64>() / cpu_window.len() as f64;

        let memory_used = sys.used_memory();
        let memory_total = sys.total_memory();
        let memory_percent = if memory_total > 0 {
            memory_used as f64 / memory_total as f64 * 100.0
        } else {
            0.0
        };

        // Interface counters reset to per-refresh deltas.
        let network_bytes: u64 = networks
            .iter()
            .map(|(_, data)| data.received() + data.transmitted())
            .sum();
        let network_bytes_per_sec = network_bytes as f64 / secs;
        let network_percent = if inner.settings.network_speed_bps > 0 {
            (network_bytes_per_sec * 8.0 / inner.settings.network_speed_bps as f64 * 100.0)
                .clamp(0.0, 100.0)
        } else {
            0.0
        };

        let status = inner.engine.status();
        let copied: u64 = status.active_tasks.iter().map(|t| t.copied_bytes).sum();
        let disk_bytes = copied.saturating_sub(prev_copied);
        prev_copied = copied;
        let disk_bytes_per_sec = disk_bytes as f64 / secs;
        let disk_mbps = disk_bytes_per_sec / 1_048_576.0;
        let disk_percent = if inner.settings.max_disk_throughput_mbps > 0.0 {
            (disk_mbps / inner.settings.max_disk_throughput_mbps * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        let free_disk_bytes = if status.destination.is_empty() {
            0
        } else {
            disk::free_space(Path::new(&status.destination)).unwrap_or(0)
        };

        *inner.metrics.lock() = PerformanceMetrics {
            cpu_percent,
            memory_used_bytes: memory_used,
            memory_total_bytes: memory_total,
            memory_percent,
            disk_bytes_per_sec,
            disk_mbps,
            disk_percent,
            network_bytes_per_sec,
            network_mbps: network_bytes_per_sec / 1_048_576.0,
            network_percent,
            free_disk_bytes,
            free_disk_gb: free_disk_bytes as f64 / 1_073_741_824.0,
        };
    }
}
