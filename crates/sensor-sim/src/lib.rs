//! Serial Sensor Simulation Library
//!
//! This crate simulates sensor devices so discovery and steady-state links
//! can be exercised without hardware. It includes:
//!
//! - **VirtualDevice**: the device side of the line protocol
//! - **run_virtual_device_task**: drives a device over an async stream
//! - **VirtualTransport**: a `PortTransport` with plug/unplug/busy controls
//!
//! # Example
//!
//! ```rust
//! use sensor_sim::{VirtualDevice, VirtualDeviceConfig};
//!
//! let mut device = VirtualDevice::new(VirtualDeviceConfig::room_sensor());
//! device.process_input(b"TYPEID\n");
//! device.set_temperature(23);
//!
//! while let Some(bytes) = device.take_output() {
//!     println!("Device output: {:?}", String::from_utf8_lossy(&bytes));
//! }
//! ```

pub mod device;
pub mod device_task;
pub mod transport;

pub use device::{VirtualDevice, VirtualDeviceConfig};
pub use device_task::{run_virtual_device_task, VirtualDeviceCommand};
pub use transport::VirtualTransport;
