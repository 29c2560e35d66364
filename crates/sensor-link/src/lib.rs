//! Steady-state sensor links
//!
//! Once a device has been discovered, a link keeps its port open, dispatches
//! readings to a [`SensorHandler`](sensor_protocol::SensorHandler), and
//! writes host requests (`CURRENTVALUES`, `REFRESH`, `ON`, `OFF`).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sensor_detect::{PortRegistry, SerialTransport};
//! use sensor_link::{connect, ChannelHandler, LinkConfig};
//!
//! # async fn run() -> Result<(), sensor_link::LinkError> {
//! let (handler, mut readings) = ChannelHandler::new("/dev/ttyACM0");
//! let link = connect(
//!     &SerialTransport::new(),
//!     &PortRegistry::new(),
//!     Some("/dev/ttyACM0"),
//!     &[],
//!     Arc::new(handler),
//!     LinkConfig::default(),
//! )?;
//!
//! if let Some((port, event)) = readings.recv().await {
//!     println!("{}: {:?}", port, event);
//! }
//! link.shutdown().await
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod handler;
pub mod link;

pub use connection::{LinkCommand, LinkConfig, SensorConnection};
pub use error::LinkError;
pub use handler::ChannelHandler;
pub use link::{connect, spawn, SensorLinkHandle};
