use crate::throttling::{HealthStatus, ThrottleReport};
use crate::{BoardCapabilities, BoardFamily, FirmwareInfo, GpuStats, HardwareInfo, Volts};

pub const BOARD_NAME: &str = "Virtual";

/// Stand-in for simulation and development hosts. Every reading is neutral.
#[derive(Clone, Copy, Debug, Default)]
pub struct VirtualBoard;

impl BoardCapabilities for VirtualBoard {
    fn family(&self) -> BoardFamily {
        BoardFamily::Virtual
    }

    fn voltage(&self) -> Volts {
        Volts::zero()
    }

    fn hardware(&self) -> HardwareInfo {
        HardwareInfo::unknown(BOARD_NAME)
    }

    fn throttling(&self) -> ThrottleReport {
        ThrottleReport::nominal(HealthStatus::NotDetected)
    }

    fn gpu(&self) -> GpuStats {
        GpuStats::default()
    }

    fn firmware(&self) -> FirmwareInfo {
        FirmwareInfo::default()
    }

    fn thermal_zone(&self) -> &'static str {
        "none"
    }
}
