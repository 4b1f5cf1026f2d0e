//! Custom error types for the application.
//!
//! This module defines the primary error type, `ScanError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures that can occur while editing parameters, talking
//! to the instrument server and persisting data.
//!
//! ## Error Hierarchy
//!
//! - **`Validation`**: A numeric field could not parse its text on commit. The field has
//!   already reverted to its last accepted value; the user only needs an inline notice.
//! - **`Configuration`**: The SDK endpoint still carries placeholder values, or the
//!   configuration is semantically wrong. Surfaced as a blocking choice (offline or abort).
//! - **`Connection`**: The instrument server refused the connection or timed out. The
//!   session stays `Disconnected` and the user may retry.
//! - **`InvalidState`**: An action was requested from a state that does not allow it.
//!   Rejected without any state change.
//! - **`SessionBusy`**: Another session operation is already in flight.
//! - **`MeasurementConfig`**: The vendor scan description could not be built. The session
//!   stays `Connected`.
//! - **`MeasurementRuntime`**: The blocking scan call failed. The session is forced back to
//!   `Connected`.
//! - **`Config`**, **`Settings`**, **`Io`**, **`Storage`**: ambient failures from figment,
//!   YAML persistence, the filesystem and the data writer.
//!
//! By using `#[from]`, `ScanError` can be created from the underlying error types,
//! simplifying error handling with the `?` operator.

use crate::session::SessionState;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid input for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },

    #[error("Instrument session is busy with another operation")]
    SessionBusy,

    #[error("Measurement configuration rejected: {0}")]
    MeasurementConfig(String),

    #[error("Measurement failed: {0}")]
    MeasurementRuntime(String),

    #[error("Instrument worker is not running")]
    WorkerStopped,

    #[error("Configuration file error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Settings file error: {0}")]
    Settings(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data storage error: {0}")]
    Storage(String),
}

impl ScanError {
    /// Build a validation error for a named field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ScanError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the operator can recover from this error without restarting.
    ///
    /// Recoverable errors are shown inline; the rest warrant a blocking message.
    pub fn can_recover(&self) -> bool {
        match self {
            ScanError::Validation { .. }
            | ScanError::Connection(_)
            | ScanError::InvalidState { .. }
            | ScanError::SessionBusy
            | ScanError::MeasurementConfig(_)
            | ScanError::MeasurementRuntime(_)
            | ScanError::Storage(_) => true,
            ScanError::Configuration(_)
            | ScanError::WorkerStopped
            | ScanError::Config(_)
            | ScanError::Settings(_)
            | ScanError::Io(_) => false,
        }
    }
}

impl From<figment::Error> for ScanError {
    fn from(value: figment::Error) -> Self {
        ScanError::Config(Box::new(value))
    }
}

impl From<csv::Error> for ScanError {
    fn from(value: csv::Error) -> Self {
        ScanError::Storage(value.to_string())
    }
}
