//! Error types for the courier message-processing core.
//!
//! Errors raised outside a pipeline run (configuration, bootstrap, direct API
//! calls) propagate to the caller through [`CourierError`]. Failures inside a
//! pipeline stage are carried as [`PipelineException`](crate::pipeline::PipelineException)
//! values and never escape the engine.

use thiserror::Error;

/// The main error type for courier operations.
#[derive(Debug, Error)]
pub enum CourierError {
    /// An argument failed validation. Never retried.
    #[error("{0}")]
    Precondition(#[from] PreconditionError),

    /// The bus was configured incorrectly.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A queue operation failed.
    #[error("{0}")]
    Queue(#[from] QueueError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised when an argument violates an operation's precondition.
#[derive(Debug, Clone, Error)]
#[error("Precondition violated for '{argument}': {message}")]
pub struct PreconditionError {
    /// The offending argument.
    pub argument: String,
    /// What was wrong with it.
    pub message: String,
}

impl PreconditionError {
    /// Creates a new precondition error.
    #[must_use]
    pub fn new(argument: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            argument: argument.into(),
            message: message.into(),
        }
    }
}

/// Errors detected while configuring the bus, before any message is processed.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// A configurator of the same type was already added.
    #[error("Configurator '{0}' has already been registered")]
    DuplicateConfigurator(String),

    /// A handler is already registered for the message type.
    #[error("A handler for message type '{0}' has already been registered")]
    DuplicateHandler(String),

    /// A required queue was not supplied.
    #[error("No {0} queue has been configured")]
    MissingQueue(&'static str),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Error raised by a queue implementation.
#[derive(Debug, Clone, Error)]
#[error("Queue '{uri}' failed: {message}")]
pub struct QueueError {
    /// The queue's URI.
    pub uri: String,
    /// The failure description.
    pub message: String,
}

impl QueueError {
    /// Creates a new queue error.
    #[must_use]
    pub fn new(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            message: message.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = CourierError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_error_display() {
        let err = PreconditionError::new("message", "message type must not be empty");
        assert_eq!(
            err.to_string(),
            "Precondition violated for 'message': message type must not be empty"
        );
    }

    #[test]
    fn test_configuration_error_display() {
        let err = ConfigurationError::DuplicateConfigurator("app::Tracing".to_string());
        assert_eq!(
            err.to_string(),
            "Configurator 'app::Tracing' has already been registered"
        );

        let err = ConfigurationError::MissingQueue("error");
        assert_eq!(err.to_string(), "No error queue has been configured");
    }

    #[test]
    fn test_courier_error_from_variants() {
        let err: CourierError = QueueError::new("memory://inbox", "offline").into();
        assert!(matches!(err, CourierError::Queue(_)));
        assert_eq!(err.to_string(), "Queue 'memory://inbox' failed: offline");

        let err: CourierError = PreconditionError::new("handler", "missing").into();
        assert!(matches!(err, CourierError::Precondition(_)));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: CourierError = parse.unwrap_err().into();
        assert!(matches!(err, CourierError::Serialization(_)));
    }
}
