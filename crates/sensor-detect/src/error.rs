//! Error types for sensor detection

use thiserror::Error;

/// Errors that can occur during discovery and identification
#[derive(Debug, Error)]
pub enum DetectError {
    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    /// Failed to open serial port
    #[error("failed to open port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    /// No port matched the requested name or fallback list
    #[error("no usable serial port found")]
    NoPortFound,

    /// I/O error while talking to a device
    #[error("I/O error on {port}: {reason}")]
    IoError { port: String, reason: String },

    /// Port busy or owned by another consumer
    #[error("port {0} is busy or in use")]
    PortBusy(String),

    /// Serial port error
    #[error("serial port error: {0}")]
    SerialPort(#[from] serialport::Error),
}

impl DetectError {
    /// Whether the port merely could not be used right now, as opposed to
    /// a fault on an established connection
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            DetectError::OpenFailed { .. } | DetectError::PortBusy(_) | DetectError::SerialPort(_)
        )
    }
}
