//! Point-in-time system metrics for `/metrics` and `/system/info`.
//!
//! Linux `/proc` and `/sys` files are the primary sources, with `sysinfo` as
//! the fallback. Unreadable sources degrade to zero or `null`.

use crate::config::MetricsConfig;
use arc_core::metrics::{format_uptime, percent_of, round_to, CpuLoad, Percent, UsageGib};
use arc_core::{MetricsSnapshot, SystemInfo};
use std::path::{Path, PathBuf};
use sysinfo::{Disks, System};
use tracing::{debug, warn};

const MEMINFO: &str = "/proc/meminfo";
const UPTIME: &str = "/proc/uptime";
const KIB_PER_GIB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Memory figures from `/proc/meminfo`, in KiB.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemInfo {
    pub total_kib: u64,
    pub free_kib: u64,
    pub buffers_kib: u64,
    pub cached_kib: u64,
}

impl MemInfo {
    /// Used is everything not free, buffered or cached.
    pub fn usage_gib(&self) -> UsageGib {
        let reclaimable = self.free_kib + self.buffers_kib + self.cached_kib;
        let used = self.total_kib.saturating_sub(reclaimable);
        UsageGib {
            used: round_to(used as f64 / KIB_PER_GIB, 2),
            total: round_to(self.total_kib as f64 / KIB_PER_GIB, 2),
        }
    }
}

/// Parse `/proc/meminfo`. `None` without a `MemTotal` line.
pub fn parse_meminfo(content: &str) -> Option<MemInfo> {
    let mut info = MemInfo::default();
    let mut saw_total = false;
    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(value) = rest.split_whitespace().next().and_then(|v| v.parse().ok()) else {
            continue;
        };
        match key.trim() {
            "MemTotal" => {
                info.total_kib = value;
                saw_total = true;
            }
            "MemFree" => info.free_kib = value,
            "Buffers" => info.buffers_kib = value,
            "Cached" => info.cached_kib = value,
            _ => {}
        }
    }
    saw_total.then_some(info)
}

/// First field of `/proc/uptime`, in seconds.
pub fn parse_uptime(content: &str) -> Option<f64> {
    content
        .split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
}

/// Thermal zone reading in millidegrees to degrees, one decimal.
pub fn parse_thermal(content: &str) -> Option<f64> {
    let millis: f64 = content.trim().parse().ok()?;
    Some(round_to(millis / 1000.0, 1))
}

/// Computes snapshots on demand. Holds no state between requests.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    thermal_zone: PathBuf,
}

impl MetricsCollector {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            thermal_zone: config.thermal_zone.clone(),
        }
    }

    /// `/metrics` payload, computed on the blocking pool.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let collector = self.clone();
        match tokio::task::spawn_blocking(move || collector.compute_metrics()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("metrics task failed: {e}");
                MetricsSnapshot::default()
            }
        }
    }

    /// `/system/info` payload, computed on the blocking pool.
    pub async fn system_info(&self) -> SystemInfo {
        let collector = self.clone();
        match tokio::task::spawn_blocking(move || collector.compute_system_info()).await {
            Ok(info) => info,
            Err(e) => {
                warn!("system info task failed: {e}");
                SystemInfo {
                    hostname: String::new(),
                    architecture: std::env::consts::ARCH.to_string(),
                    cpu_count: 1,
                    cpu_percent: 0.0,
                    memory: Percent::default(),
                    disk: Percent::default(),
                }
            }
        }
    }

    pub fn compute_metrics(&self) -> MetricsSnapshot {
        let memory = match read_optional(Path::new(MEMINFO)).and_then(|c| parse_meminfo(&c)) {
            Some(info) => info.usage_gib(),
            None => sysinfo_memory(),
        };

        let disk = root_disk()
            .map(|(used, total)| UsageGib {
                used: round_to(used as f64 / BYTES_PER_GIB, 2),
                total: round_to(total as f64 / BYTES_PER_GIB, 2),
            })
            .unwrap_or_default();

        let cpu = CpuLoad {
            load: round_to(System::load_average().one, 2),
            cores: core_count(),
        };

        let uptime_secs = read_optional(Path::new(UPTIME))
            .and_then(|c| parse_uptime(&c))
            .unwrap_or_else(|| System::uptime() as f64);

        let temp = read_optional(&self.thermal_zone).and_then(|c| parse_thermal(&c));

        MetricsSnapshot {
            memory,
            disk,
            cpu,
            uptime: format_uptime(uptime_secs),
            temp,
        }
    }

    /// Blocks for the CPU sampling interval.
    pub fn compute_system_info(&self) -> SystemInfo {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu_count = sys.cpus().len().max(1);
        let memory = percent_of(sys.used_memory() as f64, sys.total_memory() as f64);
        let disk = root_disk()
            .map(|(used, total)| percent_of(used as f64, total as f64))
            .unwrap_or_default();

        SystemInfo {
            hostname: System::host_name().unwrap_or_default(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_count,
            cpu_percent: round_to(f64::from(sys.global_cpu_usage()), 1),
            memory: Percent { percent: memory },
            disk: Percent { percent: disk },
        }
    }
}

fn read_optional(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            debug!(path = %path.display(), "metrics source unavailable: {e}");
            None
        }
    }
}

fn sysinfo_memory() -> UsageGib {
    let mut sys = System::new();
    sys.refresh_memory();
    UsageGib {
        used: round_to(sys.used_memory() as f64 / BYTES_PER_GIB, 2),
        total: round_to(sys.total_memory() as f64 / BYTES_PER_GIB, 2),
    }
}

/// `(used, total)` bytes of the filesystem mounted at `/`.
fn root_disk() -> Option<(u64, u64)> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .map(|d| {
            let total = d.total_space();
            (total.saturating_sub(d.available_space()), total)
        })
}

fn core_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
