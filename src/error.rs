//! Error types and handling for the controller.
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Main error type for the controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Settings persistence errors
    #[error("Settings error: {message}")]
    Settings { message: String },

    /// Modbus communication errors
    #[error("Modbus error: {message}")]
    Modbus { message: String },

    /// HTTP/Web server errors
    #[error("Web server error: {message}")]
    Web { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// The RPC or config named an index that is not in the registry
    #[error("Policy not found: {message}")]
    PolicyNotFound { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl ControllerError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        ControllerError::Config {
            message: message.into(),
        }
    }

    /// Create a new settings error
    pub fn settings<S: Into<String>>(message: S) -> Self {
        ControllerError::Settings {
            message: message.into(),
        }
    }

    /// Create a new Modbus error
    pub fn modbus<S: Into<String>>(message: S) -> Self {
        ControllerError::Modbus {
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        ControllerError::Web {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        ControllerError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        ControllerError::Io {
            message: message.into(),
        }
    }

    /// Create a new policy-not-found error
    pub fn policy_not_found(index: u32) -> Self {
        ControllerError::PolicyNotFound {
            message: format!("no policy registered at index {index}"),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        ControllerError::Generic {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ControllerError {
    fn from(err: std::io::Error) -> Self {
        ControllerError::io(err.to_string())
    }
}

impl From<serde_json::Error> for ControllerError {
    fn from(err: serde_json::Error) -> Self {
        ControllerError::Serialization {
            message: err.to_string(),
        }
    }
}
