//! Host and process resource readings.

use serde::{Deserialize, Serialize};
use sysinfo::{Networks, Pid, ProcessesToUpdate, System};
use tracing::debug;

use crate::error::TelemetryError;

/// One reading of host and process resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// Global CPU usage, 0-100.
    pub cpu_percent: f64,
    /// Used memory as a share of total, 0-100.
    pub memory_percent: f64,
    /// Resident memory of this process.
    pub process_memory_bytes: u64,
    /// Bytes read from disk by this process.
    pub disk_read_bytes: u64,
    /// Bytes written to disk by this process.
    pub disk_written_bytes: u64,
    /// Bytes received on all interfaces.
    pub net_received_bytes: u64,
    /// Bytes sent on all interfaces.
    pub net_sent_bytes: u64,
    /// Threads of this process.
    pub thread_count: usize,
}

/// Anything that can report a [`SystemSnapshot`].
pub trait MetricsSource: Send {
    /// Takes a reading.
    fn sample(&mut self) -> Result<SystemSnapshot, TelemetryError>;
}

/// [`MetricsSource`] backed by `sysinfo`.
pub struct SystemMetrics {
    system: System,
    networks: Networks,
    pid: Pid,
}

impl SystemMetrics {
    /// Creates a source for the current process.
    pub fn new() -> Result<Self, TelemetryError> {
        let pid = sysinfo::get_current_pid().map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        let mut system = System::new();
        // CPU usage is a delta; prime it so the first sample is meaningful.
        system.refresh_cpu_usage();
        Ok(Self {
            system,
            networks: Networks::new_with_refreshed_list(),
            pid,
        })
    }
}

impl MetricsSource for SystemMetrics {
    #[allow(clippy::cast_precision_loss)]
    fn sample(&mut self) -> Result<SystemSnapshot, TelemetryError> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        self.networks.refresh(true);

        let total = self.system.total_memory();
        let memory_percent = if total > 0 {
            self.system.used_memory() as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let process = self
            .system
            .process(self.pid)
            .ok_or_else(|| TelemetryError::Metrics(format!("process {} not visible", self.pid)))?;
        let disk = process.disk_usage();

        let (net_received_bytes, net_sent_bytes) = self
            .networks
            .list()
            .values()
            .fold((0u64, 0u64), |(rx, tx), data| {
                (rx + data.total_received(), tx + data.total_transmitted())
            });

        let snapshot = SystemSnapshot {
            cpu_percent: f64::from(self.system.global_cpu_usage()),
            memory_percent,
            process_memory_bytes: process.memory(),
            disk_read_bytes: disk.total_read_bytes,
            disk_written_bytes: disk.total_written_bytes,
            net_received_bytes,
            net_sent_bytes,
            thread_count: process.tasks().map_or(1, |tasks| tasks.len().max(1)),
        };
        debug!(
            cpu = snapshot.cpu_percent,
            memory = snapshot.memory_percent,
            rss = snapshot.process_memory_bytes,
            "Sampled system metrics"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_metrics_are_in_range() {
        let mut metrics = SystemMetrics::new().unwrap();
        let snapshot = metrics.sample().unwrap();

        assert!((0.0..=100.0).contains(&snapshot.memory_percent));
        assert!(snapshot.cpu_percent >= 0.0);
        assert!(snapshot.thread_count >= 1);
    }
}
