//! Unified error type for the Roost core.
//!
//! Every fallible operation in the core returns [`CoreResult`]. The variants
//! form a closed taxonomy so that callers can decide, per kind, whether an
//! error becomes a user-visible reply or halts initialization.
//!
//! Framework-level errors (like `ExtractError`) are defined in roost-framework.

use thiserror::Error;

// =============================================================================
// ErrorKind
// =============================================================================

/// Discriminant of a [`CoreError`], useful for matching without caring about
/// the attached message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotRegistered,
    Configuration,
    NoActiveSession,
    Expired,
    AlreadyUsed,
    NotFound,
    TransportFailure,
    Backend,
    Storage,
    NoContext,
    Cancelled,
}

impl ErrorKind {
    /// Returns the snake_case name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRegistered => "not_registered",
            Self::Configuration => "configuration",
            Self::NoActiveSession => "no_active_session",
            Self::Expired => "expired",
            Self::AlreadyUsed => "already_used",
            Self::NotFound => "not_found",
            Self::TransportFailure => "transport_failure",
            Self::Backend => "backend",
            Self::Storage => "storage",
            Self::NoContext => "no_context",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CoreError
// =============================================================================

/// Errors produced by core components and collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A capability was requested from the service locator but never registered.
    #[error("capability '{capability}' is not registered")]
    NotRegistered {
        /// Type name of the missing capability.
        capability: &'static str,
    },

    /// Invalid setup detected during initialization.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No session exists for the room.
    #[error("no active session in room '{room}'")]
    NoActiveSession {
        /// Room the caller asked for.
        room: String,
    },

    /// The token exists but its lifetime has elapsed.
    #[error("token expired")]
    Expired,

    /// The token was already consumed.
    #[error("token already used")]
    AlreadyUsed,

    /// The token is unknown.
    #[error("token not found")]
    NotFound,

    /// The transport failed to deliver or receive.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// An external backend (AI, content) failed.
    #[error("backend failure: {0}")]
    Backend(String),

    /// Key-value persistence failed.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A task-local value was requested outside of its scope.
    #[error("no execution context bound to the current task")]
    NoContext,

    /// Event processing was aborted before completion.
    #[error("processing cancelled: {0}")]
    Cancelled(String),
}

impl CoreError {
    /// Returns the kind tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotRegistered { .. } => ErrorKind::NotRegistered,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::NoActiveSession { .. } => ErrorKind::NoActiveSession,
            Self::Expired => ErrorKind::Expired,
            Self::AlreadyUsed => ErrorKind::AlreadyUsed,
            Self::NotFound => ErrorKind::NotFound,
            Self::TransportFailure(_) => ErrorKind::TransportFailure,
            Self::Backend(_) => ErrorKind::Backend,
            Self::Storage(_) => ErrorKind::Storage,
            Self::NoContext => ErrorKind::NoContext,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Creates a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a [`CoreError::NoActiveSession`] for `room`.
    pub fn no_session(room: impl Into<String>) -> Self {
        Self::NoActiveSession { room: room.into() }
    }

    /// Creates a transport failure.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportFailure(msg.into())
    }

    /// Creates a backend failure.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Creates a storage failure.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Returns `true` for the three token rejection kinds.
    pub fn is_token_rejection(&self) -> bool {
        matches!(self, Self::Expired | Self::AlreadyUsed | Self::NotFound)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Result type used across the core.
pub type CoreResult<T> = Result<T, CoreError>;
