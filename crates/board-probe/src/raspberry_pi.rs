use crate::command::{command_output, parse_key_values, run_command};
use crate::throttling::{parse_throttled, ThrottleReport};
use crate::types::{parse_month_day_year, MB, GB, MHZ};
use crate::{
    BoardCapabilities, BoardFamily, FirmwareDate, FirmwareInfo, GpuStats, HardwareInfo,
    Measurement, ModelEntry, Volts, NOT_DETECTED,
};
use tracing::debug;

pub const BOARD_NAME: &str = "Raspberry Pi";

const fn pi(
    key: &'static str,
    release_date: &'static str,
    model: &'static str,
    revision: &'static str,
    memory: u64,
    frequency: u64,
    notes: &'static str,
) -> ModelEntry {
    ModelEntry {
        key,
        release_date,
        model,
        revision,
        memory,
        frequency,
        gpu: false,
        notes,
    }
}

/// Known boards by `/proc/cpuinfo` revision code.
pub static MODELS: &[ModelEntry] = &[
    pi("900021", "Q3 2016", "A+", "1.1", 512 * MB, 700 * MHZ, "(Mfg by Sony)"),
    pi("900032", "Q2 2016?", "B+", "1.2", 512 * MB, 700 * MHZ, "(Mfg by Sony)"),
    pi("900092", "Q4 2015", "Zero", "1.2", 512 * MB, 1000 * MHZ, "(Mfg by Sony)"),
    pi("900093", "Q2 2016", "Zero", "1.3", 512 * MB, 1000 * MHZ, "(Mfg by Sony)"),
    pi("920093", "Q4 2016?", "Zero", "1.3", 512 * MB, 1000 * MHZ, "(Mfg by Embest)"),
    pi("Beta", "Q1 2012", "B (Beta)", "?", 256 * MB, 700 * MHZ, "Beta Board"),
    pi("0002", "Q1 2012", "B", "1.0", 256 * MB, 700 * MHZ, ""),
    pi("0003", "Q3 2012", "B (ECN0001)", "1.0", 256 * MB, 700 * MHZ, "Fuses mod and D14 removed"),
    pi("0004", "Q3 2012", "B", "2.0", 256 * MB, 700 * MHZ, "(Mfg by Sony)"),
    pi("0005", "Q4 2012", "B", "2.0", 256 * MB, 700 * MHZ, "(Mfg by Qisda)"),
    pi("0006", "Q4 2012", "B", "2.0", 256 * MB, 700 * MHZ, "(Mfg by Egoman)"),
    pi("0007", "Q1 2013", "A", "2.0", 256 * MB, 700 * MHZ, "(Mfg by Egoman)"),
    pi("0008", "Q1 2013", "A", "2.0", 256 * MB, 700 * MHZ, "(Mfg by Sony)"),
    pi("0009", "Q1 2013", "A", "2.0", 256 * MB, 700 * MHZ, "(Mfg by Qisda)"),
    pi("000d", "Q4 2012", "B", "2.0", 512 * MB, 700 * MHZ, "(Mfg by Egoman)"),
    pi("000e", "Q4 2012", "B", "2.0", 512 * MB, 700 * MHZ, "(Mfg by Sony)"),
    pi("000f", "Q4 2012", "B", "2.0", 512 * MB, 700 * MHZ, "(Mfg by Qisda)"),
    pi("0010", "Q3 2014", "B+", "1.0", 512 * MB, 700 * MHZ, "(Mfg by Sony)"),
    pi("0011", "Q2 2014", "Compute Module 1", "1.0", 512 * MB, 700 * MHZ, "(Mfg by Sony)"),
    pi("0012", "Q4 2014", "A+", "1.1", 256 * MB, 700 * MHZ, "(Mfg by Sony)"),
    pi("0013", "Q1 2015", "B+", "1.2", 512 * MB, 700 * MHZ, "(Mfg by Embest)"),
    pi("0014", "Q2 2014", "Compute Module 1", "1.0", 512 * MB, 700 * MHZ, "(Mfg by Embest)"),
    pi("0015", "?", "A+", "1.1", 256 * MB, 700 * MHZ, "(Mfg by Embest)"),
    pi("a01040", "Unknown", "2 model B", "1.0", 1 * GB, 900 * MHZ, "(Mfg by Sony)"),
    pi("a01041", "Q1 2015", "2 model B", "1.1", 1 * GB, 900 * MHZ, "(Mfg by Sony)"),
    pi("a21041", "Q1 2015", "2 model B", "1.1", 1 * GB, 900 * MHZ, "(Mfg by Embest)"),
    pi("a22042", "Q3 2016", "2 model B (with BCM2837)", "1.2", 1 * GB, 900 * MHZ, "(Mfg by Embest)"),
    pi("9000c1", "Q1 2017", "Zero W", "1.1", 512 * MB, 1000 * MHZ, "(Mfg by Sony)"),
    pi("a02082", "Q1 2016", "3 model B", "1.2", 1 * GB, 1200 * MHZ, "(Mfg by Sony)"),
    pi("a020a0", "Q1 2017", "Compute Module 3 (and CM3 Lite)", "1.0", 1 * GB, 1200 * MHZ, "(Mfg by Sony)"),
    pi("a22082", "Q1 2016", "3 model B", "1.2", 1 * GB, 1200 * MHZ, "(Mfg by Embest)"),
    pi("a32082", "Q4 2016", "3 model B", "1.2", 1 * GB, 1200 * MHZ, "(Mfg by Sony Japan)"),
    pi("a020d3", "Q1 2018", "3 model B+", "1.3", 1 * GB, 1400 * MHZ, "(Mfg by Sony)"),
    pi("9020e0", "Q4 2018", "3 model A+", "1.0", 512 * MB, 1400 * MHZ, "(Mfg by Sony)"),
    pi("a02100", "Q1 2019", "Compute Module 3+", "1.0", 1 * GB, 1200 * MHZ, "(Mfg by Sony)"),
    pi("a03111", "Q2 2019", "4 model B", "1.1", 1 * GB, 2000 * MHZ, "(Mfg by Sony)"),
    pi("b03111", "Q2 2019", "4 model B", "1.1", 2 * GB, 2000 * MHZ, "(Mfg by Sony)"),
    pi("b03112", "Q2 2019", "4 model B", "1.2", 2 * GB, 2000 * MHZ, "(Mfg by Sony)"),
    pi("c03111", "Q2 2019", "4 model B", "1.1", 4 * GB, 2000 * MHZ, "(Mfg by Sony)"),
    pi("c03112", "Q2 2019", "4 model B", "1.2", 4 * GB, 2000 * MHZ, "(Mfg by Sony)"),
    pi("d03114", "Q2 2020", "4 model B", "1.4", 8 * GB, 2000 * MHZ, "(Mfg by Sony)"),
];

pub fn lookup_model(revision: &str) -> Option<&'static ModelEntry> {
    MODELS.iter().find(|m| m.key == revision)
}

/// Revision code from `/proc/cpuinfo` text.
pub fn cpu_revision(cpuinfo: &str) -> Option<String> {
    parse_key_values(cpuinfo, "Revision")
        .remove("Revision")
        .filter(|r| r != NOT_DETECTED)
}

/// Board backed by the VideoCore `vcgencmd` tool.
#[derive(Clone, Debug)]
pub struct RaspberryPi {
    vcgencmd: String,
    revision: Option<String>,
}

impl RaspberryPi {
    pub fn new(revision: Option<String>) -> Self {
        Self {
            vcgencmd: "vcgencmd".to_string(),
            revision,
        }
    }

    /// Uses a different `vcgencmd` binary, e.g. a wrapper script.
    pub fn with_vcgencmd(mut self, program: impl Into<String>) -> Self {
        self.vcgencmd = program.into();
        self
    }

    fn measure_volts(&self, rail: &str) -> Measurement {
        let kv = command_output(&self.vcgencmd, &["measure_volts", rail], "volt");
        parse_volts(&kv["volt"])
    }
}

impl BoardCapabilities for RaspberryPi {
    fn family(&self) -> BoardFamily {
        BoardFamily::RaspberryPi
    }

    fn voltage(&self) -> Volts {
        Volts {
            core: self.measure_volts("core"),
            ram: self.measure_volts("sdram_i"),
        }
    }

    fn hardware(&self) -> HardwareInfo {
        self.revision
            .as_deref()
            .and_then(lookup_model)
            .map(|entry| HardwareInfo::from_entry(BOARD_NAME, entry))
            .unwrap_or_else(|| HardwareInfo::unknown(NOT_DETECTED))
    }

    fn throttling(&self) -> ThrottleReport {
        let kv = command_output(&self.vcgencmd, &["get_throttled"], "throttled");
        match parse_throttled(&kv["throttled"]) {
            Some(raw) => ThrottleReport::decode(raw),
            None => ThrottleReport::unavailable(),
        }
    }

    fn gpu(&self) -> GpuStats {
        GpuStats::default()
    }

    fn firmware(&self) -> FirmwareInfo {
        match run_command(&self.vcgencmd, &["version"]) {
            Ok(text) => parse_firmware(&text),
            Err(e) => {
                debug!(error = %e, "Firmware version unavailable");
                FirmwareInfo::default()
            }
        }
    }

    fn thermal_zone(&self) -> &'static str {
        "cpu_thermal"
    }
}

/// `1.2000V` -> 1.2
pub fn parse_volts(raw: &str) -> Measurement {
    raw.trim()
        .trim_end_matches(['V', 'v'])
        .parse::<f64>()
        .map(Measurement::Value)
        .unwrap_or(Measurement::NotDetected)
}

/// Parses `vcgencmd version`:
///
/// ```text
/// Mar 24 2020 14:07:59
/// Copyright (c) 2012 Broadcom
/// version 1ee4ff2d4e2c0... (clean) (release) (start)
/// ```
///
/// Unparseable pieces stay at their defaults.
pub fn parse_firmware(text: &str) -> FirmwareInfo {
    let mut info = FirmwareInfo::default();
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    if let Some(first) = lines.next() {
        let parts: Vec<&str> = first.split_whitespace().collect();
        if let [month, day, year, ..] = parts.as_slice() {
            if let Some(date) = parse_month_day_year(month, day, year) {
                info.date = FirmwareDate::from(date);
            }
        }
    }
    if let Some(version) = lines
        .find(|l| l.trim_start().starts_with("version"))
        .and_then(|l| l.split_whitespace().nth(1))
    {
        info.version = version.to_string();
    }
    info
}
