//! Error types for sensor protocol decoding

use thiserror::Error;

/// Errors that can occur while interpreting a decoded line
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Numeric payload could not be parsed as a signed integer
    #[error("invalid number for {verb}: {value:?}")]
    InvalidNumber { verb: &'static str, value: String },
}
