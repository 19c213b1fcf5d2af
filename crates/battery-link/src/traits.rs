use crate::{DevicePath, Result};

/// Discovery and connection side of the battery serial link.
pub trait SerialLink: Send {
    type Handle: LinkHandle;

    /// Lists devices matching the battery's USB identifier. An empty list is
    /// not an error.
    fn discover(&mut self) -> Result<Vec<DevicePath>>;

    /// Opens one device. Fails with [`crate::LinkError::Connection`] if the
    /// path is gone or busy.
    fn open(&mut self, path: &DevicePath, baud_rate: u32) -> Result<Self::Handle>;
}

/// An open connection to exactly one device.
pub trait LinkHandle: Send {
    fn path(&self) -> &DevicePath;

    fn is_open(&self) -> bool;

    /// Reads up to and excluding the next `\n`. Returns
    /// [`crate::LinkError::Timeout`] when the backend's read timeout passes
    /// without a full line; partial data is kept for the next call.
    fn read_line(&mut self) -> Result<Vec<u8>>;

    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Safe to call any number of times.
    fn close(&mut self);
}
