//! Error types for the permissions engine.
//!
//! Only [`SqlPermsError::Configuration`] is fatal to a run. Every other
//! variant is produced at a server, statement, or audit boundary where the
//! orchestrator catches it, records it, and moves on.
//!
//! Error messages never carry passwords. Connection failures keep the
//! driver's message as a `source` but the display text only names the server.

use thiserror::Error;

/// Main error type for SQLPerms operations.
#[derive(Debug, Error)]
pub enum SqlPermsError {
    /// Missing or malformed configuration (fatal, raised before any server is contacted)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Opening a session to a server failed
    #[error("Connection to {server} failed: {reason}")]
    Connection {
        server: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A single statement failed on the server
    #[error("{message}")]
    Statement { message: String },

    /// A connect or statement boundary exceeded its time budget
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// A configuration-supplied name cannot be safely placed in SQL text
    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: String,
    },

    /// Persisting the audit records failed
    #[error("Audit export failed: {context}")]
    AuditFlush {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O operation failed
    #[error("I/O operation failed: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization or deserialization failed
    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results with SqlPermsError
pub type Result<T> = std::result::Result<T, SqlPermsError>;

impl SqlPermsError {
    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a connection error that keeps the driver error as its source
    pub fn connection_failed<E>(server: impl Into<String>, reason: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            server: server.into(),
            reason: reason.into(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates a connection error with no underlying driver error
    pub fn connection(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            server: server.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Creates a statement error from the server's message
    pub fn statement(message: impl Into<String>) -> Self {
        Self::Statement {
            message: message.into(),
        }
    }

    /// Creates a timeout error
    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds: duration.as_secs(),
        }
    }

    /// Creates an identifier validation error
    pub fn invalid_identifier(
        kind: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidIdentifier {
            kind,
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Creates an audit flush error
    pub fn audit_flush<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::AuditFlush {
            context: context.into(),
            source: Some(Box::new(error)),
        }
    }

    /// Returns true for errors that must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}
