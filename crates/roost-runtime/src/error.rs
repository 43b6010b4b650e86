//! Runtime error types.

use thiserror::Error;

use roost_core::CoreError;

use crate::config::ConfigError;

/// Errors that stop the runtime from being built or from running.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Startup failed inside the core: a duplicate or missing capability,
    /// a failing init hook, or unreadable persisted state.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The builder was not given a required collaborator.
    #[error("Runtime is missing a {0}")]
    Missing(&'static str),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
