//! Error types for dj-query.
//!
//! Defines the main error enum used throughout the service, the adapters and
//! the polling client.

use thiserror::Error;

/// Main error type for dj-query operations.
#[derive(Error, Debug)]
pub enum DjqError {
    /// Conflicting or missing request selectors, rejected before any I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A lookup against a backend or the catalog returned nothing.
    #[error("Not found: {object} (catalog: {catalog})")]
    NotFound { object: String, catalog: String },

    /// Driver-level failure reported by a backend.
    ///
    /// `unexpected` marks failures that did not come from the driver itself
    /// (malformed payloads, panicked workers, transport surprises).
    #[error("{}: {message}", backend_prefix(.unexpected))]
    Backend { message: String, unexpected: bool },

    /// The server answered with something this client cannot interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The job was canceled, either by the server or by the caller.
    #[error("Canceled: {0}")]
    Canceled(String),

    /// The job reached a terminal state other than FINISHED.
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// A non-success HTTP status from the remote server.
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    /// Configuration errors (invalid config file, unknown engine type, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// State database and results store errors.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DjqError {
    /// Creates a validation error with the given message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a not-found error for a fully qualified object in a catalog.
    pub fn not_found(object: impl Into<String>, catalog: impl Into<String>) -> Self {
        Self::NotFound {
            object: object.into(),
            catalog: catalog.into(),
        }
    }

    /// Creates a driver-reported backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend {
            message: msg.into(),
            unexpected: false,
        }
    }

    /// Creates a backend error for a failure that did not originate in the driver.
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Backend {
            message: msg.into(),
            unexpected: true,
        }
    }

    /// Creates a protocol error with the given message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Creates a cancellation error with the given message.
    pub fn canceled(msg: impl Into<String>) -> Self {
        Self::Canceled(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a persistence error with the given message.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true for backend errors carrying the unexpected marker.
    pub fn is_unexpected(&self) -> bool {
        matches!(
            self,
            Self::Backend {
                unexpected: true,
                ..
            }
        )
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Validation Error",
            Self::NotFound { .. } => "Not Found",
            Self::Backend { .. } => "Backend Error",
            Self::Protocol(_) => "Protocol Error",
            Self::Canceled(_) => "Canceled",
            Self::JobFailed(_) => "Job Failed",
            Self::Http { .. } => "HTTP Error",
            Self::Config(_) => "Configuration Error",
            Self::Persistence(_) => "Persistence Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

fn backend_prefix(unexpected: &bool) -> &'static str {
    if *unexpected {
        "Unexpected backend error"
    } else {
        "Backend error"
    }
}

/// Result type alias using DjqError.
pub type Result<T> = std::result::Result<T, DjqError>;
