use crate::command::read_trimmed;
use crate::jetson::{is_jetson, Jetson};
use crate::raspberry_pi::{cpu_revision, lookup_model, RaspberryPi};
use crate::throttling::ThrottleReport;
use crate::virtual_board::VirtualBoard;
use crate::{FirmwareInfo, GpuStats, HardwareInfo, Volts};
use serde::{Deserialize, Serialize};
use tracing::info;

const COMPATIBLE: &str = "/sys/firmware/devicetree/base/compatible";
const CPUINFO: &str = "/proc/cpuinfo";
/// Set to `virtual` to force the virtual board.
pub const HARDWARE_ENV: &str = "ROBOT_HARDWARE";

/// What every board family can report. Readings that a board cannot take
/// come back as neutral values or "ND", never as errors.
pub trait BoardCapabilities {
    fn family(&self) -> BoardFamily;
    fn voltage(&self) -> Volts;
    fn hardware(&self) -> HardwareInfo;
    fn throttling(&self) -> ThrottleReport;
    fn gpu(&self) -> GpuStats;
    fn firmware(&self) -> FirmwareInfo;
    /// Sensor label prefix of the CPU temperature.
    fn thermal_zone(&self) -> &'static str;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardFamily {
    RaspberryPi,
    Jetson,
    Virtual,
}

/// Board choice as written in configuration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardSelection {
    #[default]
    Auto,
    RaspberryPi,
    Jetson,
    Virtual,
}

/// Facts the probe decides on, gathered once.
#[derive(Clone, Debug, Default)]
pub struct ProbeInputs {
    pub hardware_env: Option<String>,
    pub compatible: Option<String>,
    pub cpu_revision: Option<String>,
}

impl ProbeInputs {
    pub fn gather() -> Self {
        Self {
            hardware_env: std::env::var(HARDWARE_ENV).ok(),
            compatible: read_trimmed(COMPATIBLE).ok(),
            cpu_revision: read_trimmed(CPUINFO).ok().and_then(|t| cpu_revision(&t)),
        }
    }

    /// `ROBOT_HARDWARE=virtual`, then a `nvidia,` compatible string, then a
    /// known Raspberry Pi revision. Anything else is virtual.
    pub fn family(&self) -> BoardFamily {
        if self.hardware_env.as_deref() == Some("virtual") {
            return BoardFamily::Virtual;
        }
        if self.compatible.as_deref().is_some_and(is_jetson) {
            return BoardFamily::Jetson;
        }
        if self
            .cpu_revision
            .as_deref()
            .and_then(lookup_model)
            .is_some()
        {
            return BoardFamily::RaspberryPi;
        }
        BoardFamily::Virtual
    }
}

/// The board this process runs on, chosen once at startup.
#[derive(Clone, Debug)]
pub enum Board {
    RaspberryPi(RaspberryPi),
    Jetson(Jetson),
    Virtual(VirtualBoard),
}

impl Board {
    pub fn probe() -> Self {
        Self::select(BoardSelection::Auto, ProbeInputs::gather())
    }

    pub fn select(selection: BoardSelection, inputs: ProbeInputs) -> Self {
        let family = match selection {
            BoardSelection::Auto => inputs.family(),
            BoardSelection::RaspberryPi => BoardFamily::RaspberryPi,
            BoardSelection::Jetson => BoardFamily::Jetson,
            BoardSelection::Virtual => BoardFamily::Virtual,
        };
        let board = match family {
            BoardFamily::RaspberryPi => Board::RaspberryPi(RaspberryPi::new(inputs.cpu_revision)),
            BoardFamily::Jetson => Board::Jetson(Jetson::new(inputs.compatible.unwrap_or_default())),
            BoardFamily::Virtual => Board::Virtual(VirtualBoard),
        };
        info!(?selection, ?family, "Board selected");
        board
    }
}

impl BoardCapabilities for Board {
    fn family(&self) -> BoardFamily {
        match self {
            Board::RaspberryPi(b) => b.family(),
            Board::Jetson(b) => b.family(),
            Board::Virtual(b) => b.family(),
        }
    }

    fn voltage(&self) -> Volts {
        match self {
            Board::RaspberryPi(b) => b.voltage(),
            Board::Jetson(b) => b.voltage(),
            Board::Virtual(b) => b.voltage(),
        }
    }

    fn hardware(&self) -> HardwareInfo {
        match self {
            Board::RaspberryPi(b) => b.hardware(),
            Board::Jetson(b) => b.hardware(),
            Board::Virtual(b) => b.hardware(),
        }
    }

    fn throttling(&self) -> ThrottleReport {
        match self {
            Board::RaspberryPi(b) => b.throttling(),
            Board::Jetson(b) => b.throttling(),
            Board::Virtual(b) => b.throttling(),
        }
    }

    fn gpu(&self) -> GpuStats {
        match self {
            Board::RaspberryPi(b) => b.gpu(),
            Board::Jetson(b) => b.gpu(),
            Board::Virtual(b) => b.gpu(),
        }
    }

    fn firmware(&self) -> FirmwareInfo {
        match self {
            Board::RaspberryPi(b) => b.firmware(),
            Board::Jetson(b) => b.firmware(),
            Board::Virtual(b) => b.firmware(),
        }
    }

    fn thermal_zone(&self) -> &'static str {
        match self {
            Board::RaspberryPi(b) => b.thermal_zone(),
            Board::Jetson(b) => b.thermal_zone(),
            Board::Virtual(b) => b.thermal_zone(),
        }
    }
}
