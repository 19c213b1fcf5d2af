use anyhow::{Context, Result};
use battery_link::{DevicePath, MonitorConfig, UsbId, DEFAULT_USB_ID};
use board_probe::BoardSelection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Daemon configuration. Every field has a default, so an empty file (or no
/// file at all) is a valid configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub battery: BatteryConfig,
    /// TTL overrides in signed seconds, negative meaning "never expires".
    pub resources: BTreeMap<String, i64>,
    pub board: BoardSelection,
    pub watchdog: WatchdogConfig,
    pub triggers: TriggerConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8085".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub enabled: bool,
    /// `vvvv:pppp`, hex.
    pub usb_id: String,
    pub baud_rate: u32,
    pub backoff_ms: u64,
    pub backoff_tick_ms: u64,
    pub read_timeout_ms: u64,
    pub history_capacity: usize,
    /// Skip discovery and use this device.
    pub device: Option<String>,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            usb_id: DEFAULT_USB_ID.to_string(),
            baud_rate: 9600,
            backoff_ms: 5_000,
            backoff_tick_ms: 500,
            read_timeout_ms: 1_000,
            history_capacity: 600,
            device: None,
        }
    }
}

impl BatteryConfig {
    pub fn usb(&self) -> Result<UsbId> {
        UsbId::parse(&self.usb_id)
            .with_context(|| format!("invalid battery usb_id {:?}", self.usb_id))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            baud_rate: self.baud_rate,
            backoff: Duration::from_millis(self.backoff_ms),
            backoff_tick: Duration::from_millis(self.backoff_tick_ms.max(1)),
            history_capacity: self.history_capacity,
            device: self.device.clone().map(DevicePath::new),
            ..MonitorConfig::default()
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub period_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { period_ms: 2_000 }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub enabled: bool,
    /// Countdown handed to the battery before the OS shuts down.
    pub battery_off_delay_s: u32,
    pub shutdown_command: Vec<String>,
    pub reboot_command: Vec<String>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            battery_off_delay_s: 10,
            shutdown_command: vec!["systemctl".to_string(), "poweroff".to_string()],
            reboot_command: vec!["systemctl".to_string(), "reboot".to_string()],
        }
    }
}

impl DaemonConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text).context("invalid daemon configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make the battery worker spin.
    pub fn validate(&self) -> Result<()> {
        if self.battery.read_timeout_ms == 0 {
            anyhow::bail!("battery.read_timeout_ms must be at least 1");
        }
        self.battery.usb()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("in {}", path.display()))
    }
}
