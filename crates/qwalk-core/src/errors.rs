//! Error types for qwalk.
//!
//! Only configuration and device/transfer failures are surfaced as
//! `Result`s; they are fatal to the current simulation step and carry no
//! retry tier. Misuse of the move protocol (stale backup tag, index out
//! of range, overlapping trials) is a programming defect and fails fast
//! with an `assert!` at the violating call site instead of returning an
//! error — continuing would silently corrupt the distance table.

use thiserror::Error;

/// Unified error type for qwalk operations.
#[derive(Error, Debug)]
pub enum QwalkError {
    /// Configuration validation errors (mismatched replica topology,
    /// missing device-capable position layout, invalid lattice)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Accelerator errors (device init, kernel load/launch)
    #[error("Device error in {context}: {message}")]
    DeviceError { context: String, message: String },

    /// Host/device memory transfer failures
    #[error("Transfer error: {0}")]
    TransferError(String),

    /// Generic errors (fallback)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QwalkError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        QwalkError::ConfigError(message.into())
    }

    /// Creates a device error with context.
    pub fn device(context: impl Into<String>, message: impl Into<String>) -> Self {
        QwalkError::DeviceError {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Creates a transfer error.
    pub fn transfer(message: impl Into<String>) -> Self {
        QwalkError::TransferError(message.into())
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        QwalkError::Internal(message.into())
    }
}

/// Result type alias for qwalk operations.
pub type Result<T> = std::result::Result<T, QwalkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let config_err = QwalkError::config("replica topology mismatch");
        assert!(matches!(config_err, QwalkError::ConfigError(_)));

        let device_err = QwalkError::device("kernel launch", "CUDA_ERROR_OUT_OF_MEMORY");
        assert!(matches!(device_err, QwalkError::DeviceError { .. }));
        assert!(device_err.to_string().contains("kernel launch"));
    }
}
