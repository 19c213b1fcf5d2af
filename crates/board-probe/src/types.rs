use crate::NOT_DETECTED;
use serde::{Serialize, Serializer};

pub const MHZ: u64 = 1_000_000;
pub const GHZ: u64 = 1_000_000_000;
pub const MB: u64 = 1_000_000;
pub const GB: u64 = 1_000_000_000;

/// A reading that may be missing on this board. Serializes as the number or
/// as `"ND"`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Measurement {
    Value(f64),
    NotDetected,
}

impl Serialize for Measurement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Measurement::Value(v) => serializer.serialize_f64(*v),
            Measurement::NotDetected => serializer.serialize_str(NOT_DETECTED),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Volts {
    pub core: Measurement,
    pub ram: Measurement,
}

impl Volts {
    pub fn zero() -> Self {
        Self {
            core: Measurement::Value(0.0),
            ram: Measurement::Value(0.0),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct FirmwareDate {
    pub day: u8,
    pub month: u8,
    pub year: i32,
}

impl From<time::Date> for FirmwareDate {
    fn from(d: time::Date) -> Self {
        Self {
            day: d.day(),
            month: u8::from(d.month()),
            year: d.year(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FirmwareInfo {
    pub date: FirmwareDate,
    pub version: String,
}

impl Default for FirmwareInfo {
    fn default() -> Self {
        Self {
            date: FirmwareDate::default(),
            version: NOT_DETECTED.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct GpuStats {
    /// %
    pub percentage: f64,
    /// °C
    pub temperature: f64,
    /// mW
    pub power: u64,
}

/// Static description of a board model, keyed by revision code or
/// device-tree `compatible` string.
#[derive(Clone, Copy, Debug)]
pub struct ModelEntry {
    pub key: &'static str,
    pub release_date: &'static str,
    pub model: &'static str,
    pub revision: &'static str,
    /// Bytes.
    pub memory: u64,
    /// Hz.
    pub frequency: u64,
    pub gpu: bool,
    pub notes: &'static str,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HardwareInfo {
    pub board: String,
    pub release_date: String,
    pub model: String,
    pub revision: String,
    pub memory: u64,
    pub frequency: u64,
    pub gpu: bool,
    pub notes: String,
}

impl HardwareInfo {
    pub fn unknown(board: &str) -> Self {
        Self {
            board: board.to_string(),
            release_date: NOT_DETECTED.to_string(),
            model: NOT_DETECTED.to_string(),
            revision: NOT_DETECTED.to_string(),
            memory: 0,
            frequency: 0,
            gpu: false,
            notes: NOT_DETECTED.to_string(),
        }
    }

    pub fn from_entry(board: &str, entry: &ModelEntry) -> Self {
        Self {
            board: board.to_string(),
            release_date: entry.release_date.to_string(),
            model: entry.model.to_string(),
            revision: entry.revision.to_string(),
            memory: entry.memory,
            frequency: entry.frequency,
            gpu: entry.gpu,
            notes: entry.notes.to_string(),
        }
    }
}

/// Parses "Mar 24 2020" (whitespace-tolerant), as printed by firmware tools.
pub(crate) fn parse_month_day_year(month: &str, day: &str, year: &str) -> Option<time::Date> {
    let fmt = time::format_description::parse("[month repr:short] [day padding:none] [year]").ok()?;
    time::Date::parse(&format!("{month} {day} {year}"), &fmt).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_serializes_nd() {
        let v = serde_json::to_value(Volts {
            core: Measurement::Value(1.2),
            ram: Measurement::NotDetected,
        })
        .unwrap();
        assert_eq!(v["core"], 1.2);
        assert_eq!(v["ram"], "ND");
    }

    #[test]
    fn test_parse_month_day_year() {
        let d = parse_month_day_year("Mar", "4", "2020").unwrap();
        assert_eq!(FirmwareDate::from(d), FirmwareDate { day: 4, month: 3, year: 2020 });
        assert!(parse_month_day_year("Foo", "4", "2020").is_none());
    }
}
