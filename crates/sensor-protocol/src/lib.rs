//! Serial Sensor Protocol Library
//!
//! This crate provides framing and decoding for the line-oriented ASCII
//! protocol spoken by small serial-attached devices (room sensors, doorbells,
//! LED controllers).
//!
//! # Format
//! - Device output: `VERB=value\r\n`, verbs are case-sensitive
//! - Host requests: `KEYWORD\n` (`TYPEID`, `CURRENTVALUES`, `REFRESH`, `ON`, `OFF`)
//!
//! # Architecture
//!
//! - [`framer::LineFramer`] turns arbitrarily chunked bytes into lines
//! - [`command::Command`] splits a line into verb and raw value
//! - [`dispatch`] turns steady-state commands into [`SensorEvent`]s and
//!   handler callbacks
//!
//! # Example
//!
//! ```rust
//! use sensor_protocol::{ProtocolCodec, SensorCodec, Verb};
//!
//! let mut codec = SensorCodec::new();
//! codec.push_bytes(b"TEMPERATURE=2");
//! codec.push_bytes(b"1\r\nLOG=ok\r\n");
//!
//! let cmd = codec.next_command().unwrap();
//! assert_eq!(cmd.verb, Verb::Temperature);
//! assert_eq!(cmd.int_value(), Ok(21));
//! assert_eq!(codec.next_command().unwrap().verb, Verb::Log);
//! assert!(codec.next_command().is_none());
//! ```

pub mod command;
pub mod dispatch;
pub mod error;
pub mod framer;

pub use command::{Command, DoorbellMatch, Request, Verb};
pub use dispatch::{dispatch, dispatch_line, SensorEvent, SensorHandler, DEVICE_LOG_TARGET};
pub use error::ParseError;
pub use framer::{LineFramer, DEFAULT_MAX_LINE_LEN, LINE_DELIMITER};

/// Trait for codecs that parse incoming data streams
pub trait ProtocolCodec {
    /// The command type produced by this codec
    type Command;

    /// Push raw bytes into the codec's buffer
    fn push_bytes(&mut self, data: &[u8]);

    /// Try to extract the next complete command from the buffer
    fn next_command(&mut self) -> Option<Self::Command>;

    /// Clear the internal buffer
    fn clear(&mut self);
}

/// Trait for commands that can be encoded to bytes
pub trait EncodeCommand {
    /// Encode this command to its wire format
    fn encode(&self) -> Vec<u8>;
}

/// Streaming codec producing decoded [`Command`]s
#[derive(Debug, Clone, Default)]
pub struct SensorCodec {
    framer: LineFramer,
}

impl SensorCodec {
    /// Create a codec with the default line length cap
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with a custom line length cap
    pub fn with_max_line_len(max_line_len: Option<usize>) -> Self {
        Self {
            framer: LineFramer::with_max_line_len(max_line_len),
        }
    }

    /// Bytes currently waiting for a delimiter or for extraction
    pub fn buffered_len(&self) -> usize {
        self.framer.buffered_len()
    }
}

impl ProtocolCodec for SensorCodec {
    type Command = Command;

    fn push_bytes(&mut self, data: &[u8]) {
        self.framer.push_bytes(data);
    }

    fn next_command(&mut self) -> Option<Command> {
        self.framer.next_line().map(|line| Command::decode(&line))
    }

    fn clear(&mut self) {
        self.framer.clear();
    }
}
