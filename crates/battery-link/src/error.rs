use thiserror::Error;

pub type Result<T, E = LinkError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no battery device found: {0}")]
    DeviceNotFound(String),
    #[error("cannot open {path}: {reason}")]
    Connection { path: String, reason: String },
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("device handle is closed")]
    Closed,
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}
