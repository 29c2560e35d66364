//! Serial transport abstraction
//!
//! Discovery and steady-state links only need to enumerate ports and open
//! a configured byte stream. Real hardware goes through [`SerialTransport`];
//! tests and simulations provide their own [`PortTransport`].
//!
//! Closing a port is dropping its stream.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::debug;

use crate::error::DetectError;
use crate::scanner::{PortScanner, ScannerConfig};

/// Parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Line settings applied when a port is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl SerialSettings {
    fn data_bits(&self, port: &str) -> Result<DataBits, DetectError> {
        match self.data_bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            n => Err(unsupported(port, format!("{} data bits", n))),
        }
    }

    fn stop_bits(&self, port: &str) -> Result<StopBits, DetectError> {
        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            n => Err(unsupported(port, format!("{} stop bits", n))),
        }
    }

    fn parity(&self) -> tokio_serial::Parity {
        match self.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

fn unsupported(port: &str, what: String) -> DetectError {
    DetectError::OpenFailed {
        port: port.to_string(),
        reason: format!("unsupported setting: {}", what),
    }
}

/// Access to serial ports
pub trait PortTransport: Send + Sync + 'static {
    /// Byte stream of an open port
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Names of all currently visible ports
    fn enumerate_ports(&self) -> Result<Vec<String>, DetectError>;

    /// Open and configure a port
    fn open(&self, port: &str, settings: &SerialSettings) -> Result<Self::Stream, DetectError>;
}

/// Transport backed by the host's serial ports
#[derive(Debug, Clone, Default)]
pub struct SerialTransport {
    scanner: PortScanner,
}

impl SerialTransport {
    /// Create a transport with default scanner configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport with custom scanner configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self {
            scanner: PortScanner::with_config(config),
        }
    }

    /// Underlying scanner
    pub fn scanner(&self) -> &PortScanner {
        &self.scanner
    }
}

impl PortTransport for SerialTransport {
    type Stream = SerialStream;

    fn enumerate_ports(&self) -> Result<Vec<String>, DetectError> {
        Ok(self
            .scanner
            .enumerate_ports()?
            .into_iter()
            .map(|p| p.port)
            .collect())
    }

    fn open(&self, port: &str, settings: &SerialSettings) -> Result<SerialStream, DetectError> {
        debug!("Opening {} at {} baud", port, settings.baud_rate);

        let stream = tokio_serial::new(port, settings.baud_rate)
            .data_bits(settings.data_bits(port)?)
            .stop_bits(settings.stop_bits(port)?)
            .parity(settings.parity())
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .map_err(|e| DetectError::OpenFailed {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        Ok(stream)
    }
}
