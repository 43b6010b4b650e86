//! Error types for the handler framework.

use thiserror::Error;

use roost_core::CoreError;

/// Returned by a filter when an event does **not** match.
///
/// The dispatcher recognises this error and skips the handler without
/// logging anything. All other errors are treated as genuine failures.
#[derive(Debug, Clone, Error)]
#[error("event skipped by filter")]
pub struct EventSkipped;

/// Errors that can occur while extracting handler parameters.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The requested capability is not in the service locator.
    #[error("service '{0}' not found")]
    ServiceNotFound(&'static str),

    /// A value the extractor expected in the per-plugin state is absent.
    #[error("'{0}' not found in context")]
    MissingState(&'static str),

    /// The plugin's config section does not match the requested type.
    #[error("invalid config for plugin '{plugin}': {message}")]
    InvalidConfig { plugin: String, message: String },

    #[error("{0}")]
    Custom(String),
}

impl ExtractError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

impl From<CoreError> for ExtractError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotRegistered { capability } => Self::ServiceNotFound(capability),
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;
