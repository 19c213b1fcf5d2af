//! board-probe: what board are we on, and what can it tell us
//!
//! One capability set per board family (Raspberry Pi, Nvidia Jetson, and a
//! virtual stand-in), picked once at startup by [`Board::probe`], plus the
//! host readers (memory, swap, cpu, disk, temperature) every board shares.

/// Placeholder for any value the board could not report.
pub const NOT_DETECTED: &str = "ND";

mod error;
pub use error::{ProbeError, Result};

mod types;
pub use types::{
    FirmwareDate, FirmwareInfo, GpuStats, HardwareInfo, Measurement, ModelEntry, Volts, GB, GHZ,
    MB, MHZ,
};

mod command;
pub use command::{command_output, parse_key_values, read_trimmed, run_command};

mod throttling;
pub use throttling::{parse_throttled, HealthStatus, ThrottleFlags, ThrottleReport};

mod board;
pub use board::{Board, BoardCapabilities, BoardFamily, BoardSelection, ProbeInputs, HARDWARE_ENV};

pub mod jetson;
pub mod raspberry_pi;
pub mod virtual_board;

mod system;
pub use system::{component_temperature, CpuFrequency, CpuStats, SystemProbe, UsageStats};
