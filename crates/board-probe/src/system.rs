use crate::command::read_trimmed;
use crate::types::MHZ;
use crate::{ProbeError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use sysinfo::{Components, Disks, System};

const CPUFREQ_DIR: &str = "/sys/devices/system/cpu/cpu0/cpufreq";

/// Capacity figures in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct UsageStats {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    /// Used share, %.
    pub percentage: f64,
}

impl UsageStats {
    pub fn new(total: u64, used: u64, free: u64) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            (used as f64 / total as f64 * 1000.0).round() / 10.0
        };
        Self {
            total,
            used,
            free,
            percentage,
        }
    }
}

/// Hz.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CpuFrequency {
    pub min: u64,
    pub max: u64,
    pub current: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CpuStats {
    pub cores: usize,
    pub frequency: CpuFrequency,
    pub percentage: f64,
}

/// Host-level readings shared by every board family.
///
/// CPU usage is measured between consecutive calls, so the first reading
/// after startup is 0.
pub struct SystemProbe {
    sys: Mutex<System>,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self {
            sys: Mutex::new(sys),
        }
    }

    pub fn memory(&self) -> UsageStats {
        let mut sys = self.sys.lock();
        sys.refresh_memory();
        let total = sys.total_memory();
        let available = sys.available_memory();
        UsageStats::new(total, total.saturating_sub(available), available)
    }

    pub fn swap(&self) -> UsageStats {
        let mut sys = self.sys.lock();
        sys.refresh_memory();
        UsageStats::new(sys.total_swap(), sys.used_swap(), sys.free_swap())
    }

    pub fn cpu(&self) -> CpuStats {
        let mut sys = self.sys.lock();
        sys.refresh_cpu_usage();
        sys.refresh_cpu_frequency();
        let current = sys.cpus().first().map(|c| c.frequency() * MHZ).unwrap_or(0);
        CpuStats {
            cores: sys.cpus().len(),
            frequency: CpuFrequency {
                min: cpufreq_hz("cpuinfo_min_freq").unwrap_or(current),
                max: cpufreq_hz("cpuinfo_max_freq").unwrap_or(current),
                current,
            },
            percentage: (f64::from(sys.global_cpu_usage()) * 10.0).round() / 10.0,
        }
    }

    /// Usage of the filesystem mounted at `/`.
    pub fn disk(&self) -> Result<UsageStats> {
        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .ok_or_else(|| ProbeError::NotAvailable("no filesystem mounted at /".to_string()))?;
        let total = root.total_space();
        let free = root.available_space();
        Ok(UsageStats::new(total, total.saturating_sub(free), free))
    }

    /// °C of the first sensor whose label starts with `zone`, 0 when absent.
    pub fn temperature(&self, zone: &str) -> f64 {
        component_temperature(zone).unwrap_or(0.0)
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Temperature of the first sensor whose label starts with `prefix`
/// (case-insensitive).
pub fn component_temperature(prefix: &str) -> Option<f64> {
    let prefix = prefix.to_ascii_lowercase();
    let components = Components::new_with_refreshed_list();
    components
        .list()
        .iter()
        .find(|c| c.label().to_ascii_lowercase().starts_with(&prefix))
        .map(|c| f64::from(c.temperature()))
        .filter(|t| t.is_finite())
}

/// cpufreq values are kHz.
fn cpufreq_hz(file: &str) -> Option<u64> {
    read_trimmed(Path::new(CPUFREQ_DIR).join(file))
        .ok()?
        .parse::<u64>()
        .ok()
        .map(|khz| khz * 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_percentage() {
        let u = UsageStats::new(1000, 250, 750);
        assert_eq!(u.percentage, 25.0);
        assert_eq!(UsageStats::new(0, 0, 0).percentage, 0.0);
        assert_eq!(UsageStats::new(3, 1, 2).percentage, 33.3);
    }

    #[test]
    fn test_memory_is_consistent() {
        let probe = SystemProbe::new();
        let mem = probe.memory();
        assert!(mem.used <= mem.total);
        assert!(mem.percentage >= 0.0 && mem.percentage <= 100.0);
    }

    #[test]
    fn test_cpu_reports_cores() {
        let probe = SystemProbe::new();
        let cpu = probe.cpu();
        assert!(cpu.cores >= 1);
        assert!(cpu.percentage >= 0.0);
    }

    #[test]
    fn test_unknown_zone_reads_zero() {
        let probe = SystemProbe::new();
        assert_eq!(probe.temperature("no-such-thermal-zone-3f9a"), 0.0);
    }
}
