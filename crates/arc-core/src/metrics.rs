//! Metrics data model served by `GET /metrics` and `GET /system/info`.
//!
//! Sizes are GiB rounded to two decimals. Every field has a default so a
//! collector can drop a single unreadable source instead of failing the request.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageGib {
    pub used: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuLoad {
    /// 1-minute load average.
    pub load: f64,
    /// Logical core count.
    pub cores: usize,
}

impl Default for CpuLoad {
    fn default() -> Self {
        Self {
            load: 0.0,
            cores: 1,
        }
    }
}

/// Point-in-time system snapshot. Recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub memory: UsageGib,
    pub disk: UsageGib,
    pub cpu: CpuLoad,
    /// `"{days}d {hours}h {minutes}m"`.
    pub uptime: String,
    /// Degrees Celsius; `null` when no thermal zone is readable.
    pub temp: Option<f64>,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            memory: UsageGib::default(),
            disk: UsageGib::default(),
            cpu: CpuLoad::default(),
            uptime: format_uptime(0.0),
            temp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Percent {
    pub percent: f64,
}

/// Payload of `GET /system/info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub architecture: String,
    pub cpu_count: usize,
    pub cpu_percent: f64,
    pub memory: Percent,
    pub disk: Percent,
}

/// Render seconds of uptime as `"{d}d {h}h {m}m"`.
pub fn format_uptime(secs: f64) -> String {
    let secs = if secs.is_finite() && secs > 0.0 {
        secs as u64
    } else {
        0
    };
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    format!("{days}d {hours}h {minutes}m")
}

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// `used / total` as a percentage with one decimal; 0 when `total` is 0.
pub fn percent_of(used: f64, total: f64) -> f64 {
    if total > 0.0 {
        round_to(used / total * 100.0, 1)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(0.0), "0d 0h 0m");
        assert_eq!(format_uptime(59.9), "0d 0h 0m");
        assert_eq!(format_uptime(3_661.0), "0d 1h 1m");
        assert_eq!(format_uptime(2.0 * 86_400.0 + 5.0 * 3_600.0 + 7.0 * 60.0), "2d 5h 7m");
        assert_eq!(format_uptime(f64::NAN), "0d 0h 0m");
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(3.14159, 2), 3.14);
        assert_eq!(round_to(47.25, 1), 47.3);
        assert_eq!(percent_of(1.0, 4.0), 25.0);
        assert_eq!(percent_of(1.0, 0.0), 0.0);
    }

    #[test]
    fn snapshot_serializes_with_null_temp() {
        let json = serde_json::to_value(MetricsSnapshot::default()).unwrap();
        assert!(json["temp"].is_null());
        assert_eq!(json["cpu"]["cores"], 1);
        assert_eq!(json["uptime"], "0d 0h 0m");
    }
}
