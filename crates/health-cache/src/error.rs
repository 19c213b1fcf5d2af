use thiserror::Error;

pub type Result<T, E = RegistryError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("resource already registered: {0}")]
    Duplicate(String),
    #[error("provider for '{resource}' failed: {reason}")]
    Provider { resource: String, reason: String },
}
