//! Error types for steady-state links

use sensor_detect::DetectError;
use thiserror::Error;

/// Errors that can occur on a steady-state link
#[derive(Debug, Error)]
pub enum LinkError {
    /// Port selection, claim, or open failed
    #[error(transparent)]
    Detect(#[from] DetectError),

    /// I/O error on the open port
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device closed the connection, or the link task is gone
    #[error("link closed")]
    Closed,

    /// The link task panicked or was cancelled
    #[error("link task failed: {0}")]
    TaskFailed(String),
}
