use thiserror::Error;

pub type Result<T, E = ProbeError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },
    #[error("not available: {0}")]
    NotAvailable(String),
    #[error("command {program} failed: {reason}")]
    Command { program: String, reason: String },
}
