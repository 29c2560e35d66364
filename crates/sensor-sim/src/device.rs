//! Virtual sensor device
//!
//! Implements the device side of the line protocol: answers host requests
//! and queues `VERB=value\r\n` lines whenever a reading changes.

use std::collections::VecDeque;

use sensor_protocol::{Request, Verb};
use serde::{Deserialize, Serialize};

/// Configuration for creating a virtual device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDeviceConfig {
    /// Type id reported in answer to `TYPEID`
    pub type_id: String,
    /// Initial brightness, if the device has a light sensor
    pub brightness: Option<i32>,
    /// Initial temperature, if the device has a thermometer
    pub temperature: Option<i32>,
    /// Initial humidity, if the device has a hygrometer
    pub humidity: Option<i32>,
    /// Initial doorbell state, if the device has a button
    pub doorbell: Option<bool>,
    /// Ignore all requests (firmware that never answers)
    #[serde(default)]
    pub silent: bool,
}

impl Default for VirtualDeviceConfig {
    fn default() -> Self {
        Self::room_sensor()
    }
}

impl VirtualDeviceConfig {
    /// A room sensor reporting brightness, temperature and humidity
    pub fn room_sensor() -> Self {
        Self {
            type_id: "roomsensor".to_string(),
            brightness: Some(300),
            temperature: Some(21),
            humidity: Some(45),
            doorbell: None,
            silent: false,
        }
    }

    /// A doorbell button
    pub fn doorbell() -> Self {
        Self {
            type_id: "doorbell".to_string(),
            brightness: None,
            temperature: None,
            humidity: None,
            doorbell: Some(false),
            silent: false,
        }
    }

    /// An LED controller without sensors
    pub fn led_controller() -> Self {
        Self {
            type_id: "ledcontrol".to_string(),
            brightness: None,
            temperature: None,
            humidity: None,
            doorbell: None,
            silent: false,
        }
    }

    /// A device that never answers
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::room_sensor()
        }
    }
}

/// A simulated device that generates protocol output
#[derive(Debug)]
pub struct VirtualDevice {
    config: VirtualDeviceConfig,
    led_on: bool,
    /// Partial request line from the host
    input: Vec<u8>,
    /// Requests received so far, in order
    received: Vec<String>,
    pending_output: VecDeque<Vec<u8>>,
}

impl VirtualDevice {
    pub fn new(config: VirtualDeviceConfig) -> Self {
        Self {
            config,
            led_on: false,
            input: Vec::new(),
            received: Vec::new(),
            pending_output: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &VirtualDeviceConfig {
        &self.config
    }

    pub fn type_id(&self) -> &str {
        &self.config.type_id
    }

    pub fn is_silent(&self) -> bool {
        self.config.silent
    }

    pub fn set_silent(&mut self, silent: bool) {
        self.config.silent = silent;
    }

    /// LED state as switched by `ON`/`OFF`
    pub fn led_on(&self) -> bool {
        self.led_on
    }

    /// Request keywords received from the host
    pub fn received(&self) -> &[String] {
        &self.received
    }

    pub fn set_brightness(&mut self, value: i32) {
        if self.config.brightness != Some(value) {
            self.config.brightness = Some(value);
            self.queue_line(Verb::Brightness, value);
        }
    }

    pub fn set_temperature(&mut self, value: i32) {
        if self.config.temperature != Some(value) {
            self.config.temperature = Some(value);
            self.queue_line(Verb::Temperature, value);
        }
    }

    pub fn set_humidity(&mut self, value: i32) {
        if self.config.humidity != Some(value) {
            self.config.humidity = Some(value);
            self.queue_line(Verb::Humidity, value);
        }
    }

    /// Press or release the button; every call is reported
    pub fn press_doorbell(&mut self, pressed: bool) {
        self.config.doorbell = Some(pressed);
        self.queue_line(Verb::DoorbellPressed, pressed);
    }

    /// Emit a firmware log line
    pub fn log(&mut self, message: &str) {
        self.queue_line(Verb::Log, message);
    }

    /// Queue arbitrary bytes, e.g. malformed or partial lines
    pub fn queue_raw(&mut self, bytes: impl Into<Vec<u8>>) {
        self.pending_output.push_back(bytes.into());
    }

    /// Feed bytes written by the host
    ///
    /// Returns true if a response was queued.
    pub fn process_input(&mut self, data: &[u8]) -> bool {
        let before = self.pending_output.len();
        self.input.extend_from_slice(data);

        while let Some(pos) = self.input.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.input.drain(..=pos).collect();
            let keyword = String::from_utf8_lossy(&line[..line.len() - 1])
                .trim_end_matches('\r')
                .to_string();
            self.handle_request(&keyword);
        }

        self.pending_output.len() > before
    }

    fn handle_request(&mut self, keyword: &str) {
        self.received.push(keyword.to_string());
        if self.config.silent {
            return;
        }

        match parse_request(keyword) {
            Some(Request::TypeId) => {
                let id = self.config.type_id.clone();
                self.queue_line(Verb::TypeId, id);
            }
            Some(Request::CurrentValues) | Some(Request::Refresh) => self.send_current_values(),
            Some(Request::SwitchOn) => {
                self.led_on = true;
                self.log("LED on");
            }
            Some(Request::SwitchOff) => {
                self.led_on = false;
                self.log("LED off");
            }
            None => self.log(&format!("unknown request {}", keyword)),
        }
    }

    /// Queue one line per reading the device has
    pub fn send_current_values(&mut self) {
        if let Some(v) = self.config.brightness {
            self.queue_line(Verb::Brightness, v);
        }
        if let Some(v) = self.config.temperature {
            self.queue_line(Verb::Temperature, v);
        }
        if let Some(v) = self.config.humidity {
            self.queue_line(Verb::Humidity, v);
        }
        if let Some(v) = self.config.doorbell {
            self.queue_line(Verb::DoorbellPressed, v);
        }
    }

    fn queue_line(&mut self, verb: Verb, value: impl std::fmt::Display) {
        self.pending_output
            .push_back(format!("{}={}\r\n", verb, value).into_bytes());
    }

    /// Take the next pending output chunk
    pub fn take_output(&mut self) -> Option<Vec<u8>> {
        self.pending_output.pop_front()
    }

    pub fn has_output(&self) -> bool {
        !self.pending_output.is_empty()
    }

    pub fn clear_output(&mut self) {
        self.pending_output.clear();
    }
}

fn parse_request(keyword: &str) -> Option<Request> {
    [
        Request::TypeId,
        Request::CurrentValues,
        Request::Refresh,
        Request::SwitchOn,
        Request::SwitchOff,
    ]
    .into_iter()
    .find(|r| r.keyword() == keyword)
}
