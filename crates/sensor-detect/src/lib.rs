//! Serial Sensor Detection Library
//!
//! This crate finds serial-attached sensor devices: it enumerates ports,
//! identifies what is connected with the `TYPEID` handshake, and keeps a
//! table of discovered devices across repeated discovery rounds.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sensor_detect::{
//!     ChannelListener, DiscoveryConfig, DiscoveryService, PortRegistry, SerialTransport,
//!     SupportedTypes,
//! };
//!
//! # async fn run() -> Result<(), sensor_detect::DetectError> {
//! let (listener, mut events) = ChannelListener::new();
//! let service = DiscoveryService::new(
//!     Arc::new(SerialTransport::new()),
//!     PortRegistry::new(),
//!     DiscoveryConfig::default(),
//!     SupportedTypes::default(),
//!     Arc::new(listener),
//! );
//!
//! let report = service.scan().await?;
//! println!("{} new device(s)", report.added.len());
//! while let Ok(event) = events.try_recv() {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod discovery;
pub mod error;
pub mod identify;
pub mod registry;
pub mod scanner;
pub mod transport;

pub use device::{DiscoveredDevice, SupportedType, SupportedTypes};
pub use discovery::{
    ChannelListener, DiscoveryConfig, DiscoveryEvent, DiscoveryListener, DiscoveryService,
    ScanReport,
};
pub use error::DetectError;
pub use identify::{
    IdentificationSession, IdentifyConfig, IdentifyOutcome, Identifier, SessionState,
};
pub use registry::{PortLease, PortRegistry};
pub use scanner::{select_port, PortScanner, ScannerConfig, SerialPortInfo};
pub use transport::{Parity, PortTransport, SerialSettings, SerialTransport};
