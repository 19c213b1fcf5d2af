use crate::command::read_trimmed;
use crate::system::component_temperature;
use crate::throttling::{HealthStatus, ThrottleReport};
use crate::types::{parse_month_day_year, GB, MHZ};
use crate::{
    BoardCapabilities, BoardFamily, FirmwareDate, FirmwareInfo, GpuStats, HardwareInfo,
    ModelEntry, Volts,
};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

pub const BOARD_NAME: &str = "Nvidia Jetson";
const TEGRA_RELEASE: &str = "/etc/nv_tegra_release";
const GPU_LOAD: &str = "/sys/devices/gpu.0/load";

const fn jetson(
    key: &'static str,
    release_date: &'static str,
    model: &'static str,
    revision: &'static str,
    memory: u64,
    frequency: u64,
) -> ModelEntry {
    ModelEntry {
        key,
        release_date,
        model,
        revision,
        memory,
        frequency,
        gpu: true,
        notes: "",
    }
}

/// Known modules by device-tree `compatible` substring.
pub static MODELS: &[ModelEntry] = &[
    jetson("nvidia,p3542-0000+p3448-0003nvidia", "Q4 2020", "Nano 2GB", "", 2 * GB, 1400 * MHZ),
    jetson("nvidia,p3449-0000-a02+p3448-0000-a02", "Q2 2019", "Nano", "A02", 4 * GB, 1400 * MHZ),
    jetson("nvidia,p3449-0000-b00+p3448-0000-b00", "Q2 2019", "Nano", "B0x", 4 * GB, 1400 * MHZ),
    jetson("nvidia,p2597-0000+p3310-1000", "Q2 2017", "TX2", "", 8 * GB, 2000 * MHZ),
    jetson("nvidia,p2822-0000+p2888-0001", "Q4 2018", "AGX Xavier", "", 32 * GB, 2200 * MHZ),
    jetson("nvidia,p2597-0000+p2180-1000", "Q4 2015", "TX1", "", 4 * GB, 1700 * MHZ),
];

pub fn is_jetson(compatible: &str) -> bool {
    compatible.starts_with("nvidia,")
}

#[derive(Clone, Debug)]
pub struct Jetson {
    compatible: String,
}

impl Jetson {
    pub fn new(compatible: impl Into<String>) -> Self {
        Self {
            compatible: compatible.into(),
        }
    }
}

impl BoardCapabilities for Jetson {
    fn family(&self) -> BoardFamily {
        BoardFamily::Jetson
    }

    /// Jetson modules do not expose rail voltages.
    fn voltage(&self) -> Volts {
        Volts::zero()
    }

    fn hardware(&self) -> HardwareInfo {
        MODELS
            .iter()
            .find(|m| self.compatible.contains(m.key))
            .map(|entry| HardwareInfo::from_entry(BOARD_NAME, entry))
            .unwrap_or_else(|| HardwareInfo::unknown(BOARD_NAME))
    }

    fn throttling(&self) -> ThrottleReport {
        ThrottleReport::nominal(HealthStatus::Ok)
    }

    fn gpu(&self) -> GpuStats {
        let percentage = read_trimmed(GPU_LOAD)
            .ok()
            .and_then(|raw| raw.parse::<f64>().ok())
            .map(|per_mille| per_mille / 10.0)
            .unwrap_or(0.0);
        // TODO: read POM_5V_GPU from the INA3221 monitor for `power`.
        GpuStats {
            percentage,
            temperature: component_temperature("gpu").unwrap_or(0.0),
            power: 0,
        }
    }

    fn firmware(&self) -> FirmwareInfo {
        match read_trimmed(TEGRA_RELEASE) {
            Ok(text) => parse_tegra_release(&text),
            Err(e) => {
                debug!(error = %e, "L4T release file unavailable");
                FirmwareInfo::default()
            }
        }
    }

    fn thermal_zone(&self) -> &'static str {
        "thermal-fan-est"
    }
}

/// Parses the header of `/etc/nv_tegra_release`:
///
/// ```text
/// # R32 (release), REVISION: 4.4, GCID: 23942405, BOARD: t210ref, EABI: aarch64, DATE: Fri Oct 16 19:44:43 UTC 2020
/// ```
///
/// into version `R32.4.4` and the build date.
pub fn parse_tegra_release(text: &str) -> FirmwareInfo {
    static HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    let mut info = FirmwareInfo::default();
    let Some(line) = text.lines().find(|l| !l.trim().is_empty()) else {
        return info;
    };
    let header = HEADER.get_or_init(|| Regex::new(r"R(\d+)\s*\(release\),\s*REVISION:\s*([0-9.]+)").ok());
    if let Some(caps) = header.as_ref().and_then(|re| re.captures(line)) {
        info.version = format!("R{}.{}", &caps[1], &caps[2]);
    }
    if let Some((_, date)) = line.rsplit(',').next().and_then(|last| last.split_once(':')) {
        // Fri Oct 16 19:44:43 UTC 2020
        let parts: Vec<&str> = date.split_whitespace().collect();
        if let [_, month, day, _, _, year] = parts.as_slice() {
            if let Some(d) = parse_month_day_year(month, day, year) {
                info.date = FirmwareDate::from(d);
            }
        }
    }
    info
}
