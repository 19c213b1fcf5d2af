use crate::{DevicePath, LinkError, LinkHandle, Result, SerialLink, UsbId};
use serialport::{SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Lines longer than this without a terminator are handed up as-is.
const MAX_LINE: usize = 64 * 1024;

/// A serial port as reported by the OS, for listings.
#[derive(Clone, Debug)]
pub struct PortSummary {
    pub path: DevicePath,
    pub usb: Option<UsbId>,
    pub product: Option<String>,
}

/// Every serial port the OS knows about.
pub fn list_ports() -> Result<Vec<PortSummary>> {
    let ports = serialport::available_ports().map_err(|e| LinkError::Io(e.to_string()))?;
    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(info) => PortSummary {
                path: DevicePath::new(p.port_name),
                usb: Some(UsbId::new(info.vid, info.pid)),
                product: info.product,
            },
            _ => PortSummary {
                path: DevicePath::new(p.port_name),
                usb: None,
                product: None,
            },
        })
        .collect())
}

/// USB CDC serial backend. Candidates are the ports whose USB vendor/product
/// pair matches `usb`.
pub struct UsbSerialLink {
    usb: UsbId,
    read_timeout: Duration,
}

impl UsbSerialLink {
    pub fn new(usb: UsbId, read_timeout: Duration) -> Self {
        Self { usb, read_timeout }
    }
}

impl SerialLink for UsbSerialLink {
    type Handle = SerialHandle;

    fn discover(&mut self) -> Result<Vec<DevicePath>> {
        let found: Vec<DevicePath> = list_ports()?
            .into_iter()
            .filter(|p| p.usb == Some(self.usb))
            .map(|p| p.path)
            .collect();
        debug!(usb = %self.usb, count = found.len(), "Serial discovery finished");
        Ok(found)
    }

    fn open(&mut self, path: &DevicePath, baud_rate: u32) -> Result<SerialHandle> {
        let port = serialport::new(path.as_str(), baud_rate)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| LinkError::Connection {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(SerialHandle {
            path: path.clone(),
            port: Some(port),
            pending: Vec::with_capacity(256),
        })
    }
}

pub struct SerialHandle {
    path: DevicePath,
    port: Option<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}

impl SerialHandle {
    fn take_line(&mut self) -> Option<Vec<u8>> {
        if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            return Some(line);
        }
        if self.pending.len() >= MAX_LINE {
            return Some(std::mem::take(&mut self.pending));
        }
        None
    }
}

impl LinkHandle for SerialHandle {
    fn path(&self) -> &DevicePath {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut buf = [0u8; 256];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }
            let port = self.port.as_mut().ok_or(LinkError::Closed)?;
            match port.read(&mut buf) {
                Ok(0) => return Err(LinkError::Io("device returned end of stream".to_string())),
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => return Err(LinkError::Timeout),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(LinkError::Io(e.to_string())),
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(LinkError::Closed)?;
        port.write_all(bytes).map_err(|e| LinkError::Io(e.to_string()))
    }

    fn flush(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or(LinkError::Closed)?;
        port.flush().map_err(|e| LinkError::Io(e.to_string()))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(device = %self.path, "Serial port closed");
        }
        self.pending.clear();
    }
}
