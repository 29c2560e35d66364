//! Sensor handlers provided by this crate

use sensor_protocol::{SensorEvent, SensorHandler};
use tokio::sync::mpsc;

/// Handler that forwards readings into a channel
///
/// Events are tagged with the port they were read from, so one receiver can
/// serve several links.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    port: String,
    tx: mpsc::UnboundedSender<(String, SensorEvent)>,
}

impl ChannelHandler {
    /// Create a handler and the receiving end of its channel
    pub fn new(
        port: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<(String, SensorEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_sender(port, tx), rx)
    }

    /// Create a handler feeding an existing channel
    pub fn with_sender(
        port: impl Into<String>,
        tx: mpsc::UnboundedSender<(String, SensorEvent)>,
    ) -> Self {
        Self {
            port: port.into(),
            tx,
        }
    }

    fn forward(&self, event: SensorEvent) {
        let _ = self.tx.send((self.port.clone(), event));
    }
}

impl SensorHandler for ChannelHandler {
    fn on_brightness_changed(&self, value: i32) {
        self.forward(SensorEvent::Brightness(value));
    }

    fn on_temperature_changed(&self, value: i32) {
        self.forward(SensorEvent::Temperature(value));
    }

    fn on_humidity_changed(&self, value: i32) {
        self.forward(SensorEvent::Humidity(value));
    }

    fn on_doorbell_pressed(&self, pressed: bool) {
        self.forward(SensorEvent::Doorbell(pressed));
    }
}
