//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the service backbone and messaging protocol.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Malformed layer list (empty, duplicate names).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A backward dependency was not bound when its dependent was resolved.
    #[error("unresolved dependency '{dependency}' required by '{dependent}'")]
    UnresolvedDependency { dependency: String, dependent: String },

    /// A service name was bound twice.
    #[error("service already bound: {0}")]
    DuplicateBinding(String),

    /// A factory returned an error while building its service.
    #[error("factory for '{service}' failed: {reason}")]
    FactoryFailed { service: String, reason: String },

    /// Malformed interface descriptor.
    #[error("interface compile error: {0}")]
    InterfaceCompile(String),

    /// A remote message handler failed; carries the handler's error text.
    #[error("remote error: {0}")]
    Remote(String),

    /// No response (or no startup completion) within the allotted window.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Unknown service, message, or event name.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid argument supplied by the caller.
    #[error("validation error: {0}")]
    Validation(String),

    /// Transport-level failure (peer gone, channel closed).
    #[error("channel error: {0}")]
    Channel(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Stable machine-readable code, used in structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "CONFIGURATION",
            Error::UnresolvedDependency { .. } => "UNRESOLVED_DEPENDENCY",
            Error::DuplicateBinding(_) => "DUPLICATE_BINDING",
            Error::FactoryFailed { .. } => "FACTORY_FAILED",
            Error::InterfaceCompile(_) => "INTERFACE_COMPILE",
            Error::Remote(_) => "REMOTE",
            Error::Timeout(_) => "TIMEOUT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Validation(_) => "VALIDATION",
            Error::Channel(_) => "CHANNEL",
            Error::Internal(_) => "INTERNAL",
            Error::Serialization(_) => "SERIALIZATION",
        }
    }

    /// Whether this error aborts backbone startup.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::UnresolvedDependency { .. }
                | Error::DuplicateBinding(_)
                | Error::FactoryFailed { .. }
                | Error::Timeout(_)
        )
    }
}

// Convenience constructors
impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn unresolved(dependency: impl Into<String>, dependent: impl Into<String>) -> Self {
        Self::UnresolvedDependency {
            dependency: dependency.into(),
            dependent: dependent.into(),
        }
    }

    pub fn factory_failed(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FactoryFailed {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn interface(msg: impl Into<String>) -> Self {
        Self::InterfaceCompile(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
