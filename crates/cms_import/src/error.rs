//! Error types for the import and reconciliation pipeline.

use cms_db::BackendError;
use thiserror::Error;

use crate::registry::RegistryError;

pub type Result<T> = std::result::Result<T, ImportError>;

/// Failures surfaced to callers of the import service.
///
/// Decode and argument errors are caller-correctable; storage errors carry
/// the backend's message through [`BackendError`].
#[derive(Debug, Error)]
pub enum ImportError {
    /// Input was not well-formed delimited text.
    #[error("CSV decode error: {0}")]
    Decode(String),

    /// Empty key, malformed field map, or a batch whose shape does not match the registry.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The storage backend rejected or failed the operation.
    #[error("Storage error: {0}")]
    Storage(#[from] BackendError),

    #[error("Schema registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl ImportError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// True for errors the caller can fix by changing its input.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, ImportError::Decode(_) | ImportError::InvalidArgument(_))
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_are_classified() {
        assert!(ImportError::Decode("bad quote".into()).is_caller_error());
        assert!(ImportError::invalid_argument("empty key").is_caller_error());
        let storage = ImportError::from(BackendError::Unavailable("pool closed".into()));
        assert!(!storage.is_caller_error());
        assert_eq!(
            storage.to_string(),
            format!("Storage error: {}", BackendError::Unavailable("pool closed".into()))
        );
    }
}
