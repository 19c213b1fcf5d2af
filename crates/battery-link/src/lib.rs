//! battery-link: serial connection to the robot battery pack
//!
//! This crate discovers the pack by its USB identifier, decodes the pack's
//! line protocol, sends fire-and-forget commands, and runs the reconnecting
//! monitor that publishes readings into the shared health cache. The default
//! build enables a `mock` backend so that binaries compile and run on any host;
//! the real USB serial backend is behind the `serial` feature.

mod types;
pub use types::{BatteryInfo, BatterySnapshot, BootInfo, DevicePath, UsbId, NOT_DETECTED};

mod error;
pub use error::{LinkError, Result};

mod traits;
pub use traits::{LinkHandle, SerialLink};

mod decode;
pub use decode::{clean_line, decode_record, parse_fields, LineAssembler, ProtocolDecoder, Record};

mod command;
pub use command::{BatteryCommand, CommandQueue, DrainReport, WRITE_ATTEMPTS};

mod history;
pub use history::HistoryBuffer;

mod monitor;
pub use monitor::{
    BatteryMonitor, LinkState, MonitorConfig, MonitorHandle, MonitorStatus, SnapshotCallback,
};

/// Vendor/product pair the pack enumerates with.
pub const DEFAULT_USB_ID: UsbId = UsbId::new(0x16d0, 0x0557);

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockHandle, MockLink, MockRead};

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::{list_ports, PortSummary, SerialHandle, UsbSerialLink};
