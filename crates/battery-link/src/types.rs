use core::fmt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Placeholder used for any device-info field the battery has not reported.
pub const NOT_DETECTED: &str = "ND";

/// Filesystem path of a candidate serial device, e.g. `/dev/ttyACM0`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct DevicePath(String);

impl DevicePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// USB vendor/product pair used to recognise the battery.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl UsbId {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }

    /// Parses `vvvv:pppp` (hex, as printed by `lsusb`).
    pub fn parse(s: &str) -> Option<Self> {
        let (vid, pid) = s.trim().split_once(':')?;
        let vid = u16::from_str_radix(vid.trim_start_matches("0x"), 16).ok()?;
        let pid = u16::from_str_radix(pid.trim_start_matches("0x"), 16).ok()?;
        Some(Self { vid, pid })
    }
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// One decoded telemetry reading, already in SI-ish units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatterySnapshot {
    /// Cell temperature, °C.
    pub temperature: f64,
    /// V
    pub cell_voltage: f64,
    /// Charger input, V.
    pub input_voltage: f64,
    /// A, negative while discharging.
    pub current: f64,
    pub cycle_count: u32,
    /// State of charge, %.
    pub percentage: u32,
    /// Seconds.
    pub time_to_empty: i64,
    pub usb_out_1_voltage: f64,
    pub usb_out_2_voltage: f64,
}

impl BatterySnapshot {
    /// Shape published under the `battery` resource.
    pub fn to_resource_value(&self) -> Value {
        let mut fields = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        fields.insert("present".to_string(), Value::Bool(true));
        json!({ "battery": Value::Object(fields) })
    }

    /// Value served before any reading has arrived.
    pub fn absent_resource_value() -> Value {
        json!({
            "battery": {
                "present": false,
                "temperature": 0.0,
                "cell_voltage": 0.0,
                "input_voltage": 0.0,
                "current": 0.0,
                "cycle_count": 0,
                "percentage": 0,
                "time_to_empty": 0,
                "usb_out_1_voltage": 0.0,
                "usb_out_2_voltage": 0.0
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootInfo {
    pub code_version: String,
    pub pcb_version: String,
    pub date: String,
}

impl Default for BootInfo {
    fn default() -> Self {
        Self {
            code_version: NOT_DETECTED.to_string(),
            pcb_version: NOT_DETECTED.to_string(),
            date: NOT_DETECTED.to_string(),
        }
    }
}

/// Identity of the connected battery pack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryInfo {
    pub firmware_version: String,
    pub boot: BootInfo,
    pub serial_number: String,
}

impl BatteryInfo {
    pub fn placeholder() -> Self {
        Self {
            firmware_version: NOT_DETECTED.to_string(),
            boot: BootInfo::default(),
            serial_number: NOT_DETECTED.to_string(),
        }
    }
}
