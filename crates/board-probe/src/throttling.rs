use serde::{Deserialize, Serialize};

/// Overall verdict attached to a throttling report.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum HealthStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "ND")]
    NotDetected,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ThrottleFlags {
    #[serde(rename = "under-voltage-now")]
    pub under_voltage_now: bool,
    #[serde(rename = "freq-capped-now")]
    pub freq_capped_now: bool,
    #[serde(rename = "throttling-now")]
    pub throttling_now: bool,
    #[serde(rename = "under-voltage-occurred")]
    pub under_voltage_occurred: bool,
    #[serde(rename = "freq-capped-occurred")]
    pub freq_capped_occurred: bool,
    #[serde(rename = "throttling-occurred")]
    pub throttling_occurred: bool,
}

impl ThrottleFlags {
    /// Bit layout of `vcgencmd get_throttled`.
    pub fn from_bits(raw: u32) -> Self {
        let bit = |n: u32| raw & (1 << n) != 0;
        Self {
            under_voltage_now: bit(0),
            freq_capped_now: bit(1),
            throttling_now: bit(2),
            under_voltage_occurred: bit(16),
            freq_capped_occurred: bit(17),
            throttling_occurred: bit(18),
        }
    }
}

/// Served as the `status` resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThrottleReport {
    pub throttling: ThrottleFlags,
    pub status: HealthStatus,
    pub status_msgs: Vec<String>,
}

impl ThrottleReport {
    pub fn decode(raw: u32) -> Self {
        let flags = ThrottleFlags::from_bits(raw);
        let mut msgs = Vec::new();
        let mut status = HealthStatus::Ok;
        let errors = [
            (flags.throttling_now, "Error: PI is throttled"),
            (flags.freq_capped_now, "Error: Frequency is capped"),
            (flags.under_voltage_now, "Error: Under-voltage"),
        ];
        let warnings = [
            (flags.throttling_occurred, "Warning: PI throttling occurred in the past."),
            (flags.freq_capped_occurred, "Warning: Frequency is capped occurred in the past."),
            (flags.under_voltage_occurred, "Warning: Under-voltage occurred in the past."),
        ];
        for (set, msg) in errors {
            if set {
                msgs.push(msg.to_string());
                status = HealthStatus::Error;
            }
        }
        for (set, msg) in warnings {
            if set {
                msgs.push(msg.to_string());
                if status == HealthStatus::Ok {
                    status = HealthStatus::Warning;
                }
            }
        }
        Self {
            throttling: flags,
            status,
            status_msgs: msgs,
        }
    }

    /// No flags set, fixed verdict.
    pub fn nominal(status: HealthStatus) -> Self {
        Self {
            throttling: ThrottleFlags::default(),
            status,
            status_msgs: Vec::new(),
        }
    }

    /// The firmware interface could not be queried.
    pub fn unavailable() -> Self {
        Self {
            throttling: ThrottleFlags::default(),
            status: HealthStatus::Error,
            status_msgs: vec!["Error fetching data from the VCHI device.".to_string()],
        }
    }
}

/// Parses `0x50005` (or decimal) as printed after `throttled=`.
pub fn parse_throttled(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}
