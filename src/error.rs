//! Error types for mirage

use thiserror::Error;

use crate::value::Exception;

/// Result type for mirage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mirage
///
/// Only host-facing APIs return this type. Faults raised inside the synthetic
/// environment are contained there and never reach the hosted script; the one
/// exception is a top-level script fault, which surfaces here as [`Error::Script`].
#[derive(Debug, Error)]
pub enum Error {
    /// The hosted script threw at top level
    #[error("Script '{label}' failed: {exception}")]
    Script {
        label: String,
        exception: Exception,
        /// Stack as presented to the guest, after frame rewriting
        stack: String,
    },

    /// Polling for a completion signal ran out of time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid configuration or profile
    #[error("Configuration error: {0}")]
    Config(String),

    /// The network collaborator failed
    #[error("Network error in {operation}: {message}")]
    Network { operation: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The environment was torn down before the operation ran
    #[error("Environment torn down")]
    TornDown,
}

impl Error {
    /// Create a script fault
    pub fn script(label: impl Into<String>, exception: Exception, stack: impl Into<String>) -> Self {
        Self::Script {
            label: label.into(),
            exception,
            stack: stack.into(),
        }
    }

    /// Create a network error with operation context
    pub fn network(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this is a top-level script fault
    pub fn is_script_fault(&self) -> bool {
        matches!(self, Error::Script { .. })
    }

    /// The guest-visible stack of a script fault
    pub fn script_stack(&self) -> Option<&str> {
        match self {
            Error::Script { stack, .. } => Some(stack),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_fault_accessors() {
        let err = Error::script("target", Exception::error("boom"), "Error: boom");
        assert!(err.is_script_fault());
        assert_eq!(err.script_stack(), Some("Error: boom"));
        assert!(err.to_string().contains("target"));
    }

    #[test]
    fn test_network_error_display() {
        let err = Error::network("send", "connection refused");
        assert!(!err.is_script_fault());
        assert_eq!(
            err.to_string(),
            "Network error in send: connection refused"
        );
    }
}
