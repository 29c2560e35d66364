//! Serial port scanner
//!
//! Enumerates the serial ports visible to the host and picks a port for a
//! device whose port name was not configured explicitly.

use serde::{Deserialize, Serialize};
use serialport::{available_ports, SerialPortType};
use tracing::{debug, info};

use crate::error::DetectError;

/// Information about a serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., /dev/ttyACM0, COM3)
    pub port: String,
    /// USB Vendor ID (if USB)
    pub vid: Option<u16>,
    /// USB Product ID (if USB)
    pub pid: Option<u16>,
    /// USB product string
    pub product: Option<String>,
}

impl SerialPortInfo {
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                port: name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product.clone(),
            },
            _ => Self {
                port: name,
                vid: None,
                pid: None,
                product: None,
            },
        }
    }

    /// Short description for logs
    pub fn description(&self) -> String {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => format!(
                "{} [{:04x}:{:04x}]",
                self.product.as_deref().unwrap_or("USB serial"),
                vid,
                pid
            ),
            _ => "serial".to_string(),
        }
    }
}

/// Serial port scanner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Skip ports whose name contains any of these patterns
    pub skip_patterns: Vec<String>,
    /// Ports tried, in order, when no port is configured for a device
    pub fallback_ports: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            skip_patterns: vec![
                // Bluetooth ports on macOS
                "Bluetooth".to_string(),
                // Debug/logging ports
                "debug".to_string(),
            ],
            fallback_ports: vec![
                "/dev/tty.usbserial-A9007UX1".to_string(),
                "/dev/ttyACM0".to_string(),
                "/dev/ttyUSB0".to_string(),
                "COM3".to_string(),
            ],
        }
    }
}

/// Serial port scanner
#[derive(Debug, Clone, Default)]
pub struct PortScanner {
    config: ScannerConfig,
}

impl PortScanner {
    /// Create a new scanner with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Scanner configuration
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Enumerate all available serial ports
    pub fn enumerate_ports(&self) -> Result<Vec<SerialPortInfo>, DetectError> {
        let ports = available_ports().map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;

        let result: Vec<_> = ports
            .into_iter()
            .map(|p| SerialPortInfo::from_serialport(p.port_name, &p.port_type))
            .filter(|p| !self.should_skip_port(&p.port))
            .collect();

        debug!("Found {} serial port(s)", result.len());
        for port in &result {
            debug!("  {} - {}", port.port, port.description());
        }

        Ok(result)
    }

    /// Pick the port to use for a steady-state connection
    pub fn select_port(&self, requested: Option<&str>) -> Result<String, DetectError> {
        let names: Vec<String> = self
            .enumerate_ports()?
            .into_iter()
            .map(|p| p.port)
            .collect();
        select_port(&names, requested, &self.config.fallback_ports)
    }

    fn should_skip_port(&self, port: &str) -> bool {
        self.config
            .skip_patterns
            .iter()
            .any(|pattern| port.contains(pattern.as_str()))
    }
}

/// Choose a port among `available`
///
/// An explicitly requested port must be present. Without one, the first
/// available port that appears in `fallback` wins.
pub fn select_port(
    available: &[String],
    requested: Option<&str>,
    fallback: &[String],
) -> Result<String, DetectError> {
    match requested {
        Some(name) => {
            info!("Using configured serial port '{}'", name);
            available
                .iter()
                .find(|p| p.as_str() == name)
                .cloned()
                .ok_or(DetectError::NoPortFound)
        }
        None => {
            info!("No serial port configured, trying fallback ports");
            let found = available
                .iter()
                .find(|p| fallback.iter().any(|f| f == *p))
                .cloned();
            if let Some(port) = &found {
                info!("'{}' matches a fallback port", port);
            }
            found.ok_or(DetectError::NoPortFound)
        }
    }
}
