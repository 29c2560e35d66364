//! Steady-state command dispatch
//!
//! Routes decoded lines from an identified device to a [`SensorHandler`].
//! Decode problems never escape this module: malformed payloads and unknown
//! verbs are logged and the line is dropped so the connection stays usable.

use tracing::{debug, info, warn};

use crate::command::{Command, DoorbellMatch, Verb};
use crate::error::ParseError;

/// Tracing target for messages forwarded from device firmware
pub const DEVICE_LOG_TARGET: &str = "device_log";

/// Typed sensor event produced from a recognized line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensorEvent {
    /// Brightness changed
    Brightness(i32),
    /// Temperature changed
    Temperature(i32),
    /// Humidity changed
    Humidity(i32),
    /// Doorbell pressed or released
    Doorbell(bool),
}

impl SensorEvent {
    /// Convert a command into an event
    ///
    /// Returns `Ok(None)` for verbs that carry no application event
    /// (`LOG`, `TYPEID`, unknown lines).
    pub fn from_command(
        cmd: &Command,
        doorbell: DoorbellMatch,
    ) -> Result<Option<SensorEvent>, ParseError> {
        let event = match cmd.verb {
            Verb::Brightness => SensorEvent::Brightness(cmd.int_value()?),
            Verb::Temperature => SensorEvent::Temperature(cmd.int_value()?),
            Verb::Humidity => SensorEvent::Humidity(cmd.int_value()?),
            Verb::DoorbellPressed => SensorEvent::Doorbell(cmd.pressed_value(doorbell)),
            Verb::TypeId | Verb::Log | Verb::Unknown => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Invoke the matching handler callback
    pub fn deliver(self, handler: &dyn SensorHandler) {
        match self {
            SensorEvent::Brightness(v) => handler.on_brightness_changed(v),
            SensorEvent::Temperature(v) => handler.on_temperature_changed(v),
            SensorEvent::Humidity(v) => handler.on_humidity_changed(v),
            SensorEvent::Doorbell(p) => handler.on_doorbell_pressed(p),
        }
    }
}

/// Receiver for steady-state sensor readings
///
/// Callbacks run on the task reading the port and must not block.
pub trait SensorHandler: Send + Sync {
    fn on_brightness_changed(&self, value: i32);

    fn on_temperature_changed(&self, value: i32);

    fn on_humidity_changed(&self, value: i32);

    fn on_doorbell_pressed(&self, pressed: bool);
}

/// Dispatch one decoded command
///
/// Returns the event that was delivered, if any.
pub fn dispatch(
    cmd: &Command,
    handler: &dyn SensorHandler,
    doorbell: DoorbellMatch,
) -> Option<SensorEvent> {
    match cmd.verb {
        Verb::Log => {
            debug!(target: DEVICE_LOG_TARGET, "{}", cmd.value);
            None
        }
        Verb::TypeId => {
            debug!("Ignoring type id {:?} outside identification", cmd.value);
            None
        }
        Verb::Unknown => {
            info!("Unknown incoming serial line: {:?}", cmd.value);
            None
        }
        _ => match SensorEvent::from_command(cmd, doorbell) {
            Ok(Some(event)) => {
                event.deliver(handler);
                Some(event)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Dropping line {}: {}", cmd, e);
                None
            }
        },
    }
}

/// Decode and dispatch a framed line
pub fn dispatch_line(
    line: &str,
    handler: &dyn SensorHandler,
    doorbell: DoorbellMatch,
) -> Option<SensorEvent> {
    dispatch(&Command::decode(line), handler, doorbell)
}
