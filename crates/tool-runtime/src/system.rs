//! CPU and memory utilisation via `sysinfo`. Every call re-samples.

use std::time::Duration;

use hostgate_core::GatewayError;
use serde::Serialize;
use sysinfo::System;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub percent: f64,
}

impl MemoryStats {
    /// `used = total - available`, as `free` reports it.
    pub fn from_totals(total: u64, available: u64) -> Self {
        let available = available.min(total);
        let used = total - available;
        let percent = if total == 0 {
            0.0
        } else {
            round1(used as f64 / total as f64 * 100.0)
        };
        Self {
            total_bytes: total,
            used_bytes: used,
            available_bytes: available,
            percent,
        }
    }
}

/// Busy share as reported by the OS, clamped to [0, 100].
pub fn normalize_cpu(usage: f32) -> f64 {
    if !usage.is_finite() {
        return 0.0;
    }
    round1(f64::from(usage).clamp(0.0, 100.0))
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn ensure_supported() -> Result<(), GatewayError> {
    if sysinfo::IS_SUPPORTED_SYSTEM {
        Ok(())
    } else {
        Err(GatewayError::internal(
            "OS reporting unavailable: CPU and memory statistics are not supported on this platform",
        ))
    }
}

pub struct SystemInfoProbe {
    default_interval: Duration,
}

impl SystemInfoProbe {
    pub const MAX_INTERVAL: Duration = Duration::from_secs(10);
    /// Shorter windows than this give sysinfo nothing to diff on Linux.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(200);

    pub fn new(default_interval: Duration) -> Self {
        Self { default_interval }
    }

    fn sample_interval(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_interval)
            .clamp(Self::MIN_INTERVAL, Self::MAX_INTERVAL)
    }

    pub async fn cpu_percent(&self, interval: Option<Duration>) -> Result<f64, GatewayError> {
        ensure_supported()?;
        let interval = self.sample_interval(interval);
        let mut system = System::new();
        system.refresh_cpu();
        tokio::time::sleep(interval).await;
        system.refresh_cpu();
        Ok(normalize_cpu(system.global_cpu_info().cpu_usage()))
    }

    pub async fn memory_stats(&self) -> Result<MemoryStats, GatewayError> {
        ensure_supported()?;
        let mut system = System::new();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Err(GatewayError::internal("OS reporting unavailable: total memory reads as zero"));
        }
        Ok(MemoryStats::from_totals(total, system.available_memory()))
    }
}
