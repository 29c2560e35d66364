//! Decoded device lines and outbound requests
//!
//! Every inbound line has the form `VERB=value`. The verb is matched
//! case-sensitively against a fixed set; anything else decodes as
//! [`Verb::Unknown`] and keeps the whole line for diagnostics.

use std::fmt;

use crate::error::ParseError;
use crate::EncodeCommand;

/// Verbs a device may send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Verb {
    /// Ambient brightness reading
    Brightness,
    /// Temperature reading
    Temperature,
    /// Relative humidity reading
    Humidity,
    /// Doorbell button state
    DoorbellPressed,
    /// Identification response
    TypeId,
    /// Free-form firmware log message
    Log,
    /// Anything that is not `KNOWN_VERB=...`
    Unknown,
}

impl Verb {
    const KNOWN: [Verb; 6] = [
        Verb::Brightness,
        Verb::Temperature,
        Verb::Humidity,
        Verb::DoorbellPressed,
        Verb::TypeId,
        Verb::Log,
    ];

    /// Wire name of the verb
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Brightness => "BRIGHTNESS",
            Verb::Temperature => "TEMPERATURE",
            Verb::Humidity => "HUMIDITY",
            Verb::DoorbellPressed => "DOORBELL_PRESSED",
            Verb::TypeId => "TYPEID",
            Verb::Log => "LOG",
            Verb::Unknown => "UNKNOWN",
        }
    }

    /// Look up a verb by its exact wire name
    pub fn from_wire(name: &str) -> Option<Verb> {
        Self::KNOWN.into_iter().find(|v| v.as_str() == name)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How `DOORBELL_PRESSED` payloads are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DoorbellMatch {
    /// Only the literal `true` means pressed
    #[default]
    Exact,
    /// Any payload ending in `true` means pressed (older firmware)
    Suffix,
}

/// A single decoded line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Recognized verb, or `Unknown`
    pub verb: Verb,
    /// Text after the first `=`; the whole line for `Unknown`
    pub value: String,
}

impl Command {
    /// Decode a framed line (delimiter already stripped)
    pub fn decode(line: &str) -> Command {
        if let Some((name, value)) = line.split_once('=') {
            if let Some(verb) = Verb::from_wire(name) {
                return Command {
                    verb,
                    value: value.to_string(),
                };
            }
        }

        Command {
            verb: Verb::Unknown,
            value: line.to_string(),
        }
    }

    /// Parse the value as a signed base-10 integer
    pub fn int_value(&self) -> Result<i32, ParseError> {
        self.value
            .parse::<i32>()
            .map_err(|_| ParseError::InvalidNumber {
                verb: self.verb.as_str(),
                value: self.value.clone(),
            })
    }

    /// Interpret the value as a doorbell state
    pub fn pressed_value(&self, policy: DoorbellMatch) -> bool {
        match policy {
            DoorbellMatch::Exact => self.value == "true",
            DoorbellMatch::Suffix => self.value.ends_with("true"),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.verb {
            Verb::Unknown => f.write_str(&self.value),
            verb => write!(f, "{}={}", verb, self.value),
        }
    }
}

/// Requests the host sends to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Request {
    /// Ask the device for its type identifier
    TypeId,
    /// Ask for all current sensor values
    CurrentValues,
    /// Ask the device to refresh its readings
    Refresh,
    /// Switch an LED controller on
    SwitchOn,
    /// Switch an LED controller off
    SwitchOff,
}

impl Request {
    /// Wire keyword for the request
    pub fn keyword(&self) -> &'static str {
        match self {
            Request::TypeId => "TYPEID",
            Request::CurrentValues => "CURRENTVALUES",
            Request::Refresh => "REFRESH",
            Request::SwitchOn => "ON",
            Request::SwitchOff => "OFF",
        }
    }
}

impl EncodeCommand for Request {
    /// Requests are terminated by a bare `\n`, unlike device output
    fn encode(&self) -> Vec<u8> {
        let mut out = self.keyword().as_bytes().to_vec();
        out.push(b'\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_brightness() {
        let cmd = Command::decode("BRIGHTNESS=42");
        assert_eq!(cmd.verb, Verb::Brightness);
        assert_eq!(cmd.value, "42");
        assert_eq!(cmd.int_value(), Ok(42));
    }

    #[test]
    fn test_decode_negative_temperature() {
        let cmd = Command::decode("TEMPERATURE=-7");
        assert_eq!(cmd.verb, Verb::Temperature);
        assert_eq!(cmd.int_value(), Ok(-7));
    }

    #[test]
    fn test_non_numeric_payload() {
        let cmd = Command::decode("BRIGHTNESS=abc");
        assert_eq!(cmd.verb, Verb::Brightness);
        assert!(matches!(
            cmd.int_value(),
            Err(ParseError::InvalidNumber { verb: "BRIGHTNESS", .. })
        ));
    }

    #[test]
    fn test_value_split_on_first_equals() {
        let cmd = Command::decode("LOG=a=b=c");
        assert_eq!(cmd.verb, Verb::Log);
        assert_eq!(cmd.value, "a=b=c");
    }

    #[test]
    fn test_typeid_response() {
        let cmd = Command::decode("TYPEID=roomsensor");
        assert_eq!(cmd.verb, Verb::TypeId);
        assert_eq!(cmd.value, "roomsensor");
    }

    #[test]
    fn test_unknown_lines_keep_whole_text() {
        for line in ["HELLO", "brightness=4", "BRIGHTNESS", "VOLTAGE=3", "=5", ""] {
            let cmd = Command::decode(line);
            assert_eq!(cmd.verb, Verb::Unknown, "line {:?}", line);
            assert_eq!(cmd.value, line);
        }
    }

    #[test]
    fn test_empty_value() {
        let cmd = Command::decode("TYPEID=");
        assert_eq!(cmd.verb, Verb::TypeId);
        assert_eq!(cmd.value, "");
    }

    #[test]
    fn test_doorbell_exact() {
        let pressed = Command::decode("DOORBELL_PRESSED=true");
        let released = Command::decode("DOORBELL_PRESSED=false");
        let noisy = Command::decode("DOORBELL_PRESSED=nottrue");
        assert!(pressed.pressed_value(DoorbellMatch::Exact));
        assert!(!released.pressed_value(DoorbellMatch::Exact));
        assert!(!noisy.pressed_value(DoorbellMatch::Exact));
        assert!(!Command::decode("DOORBELL_PRESSED=TRUE").pressed_value(DoorbellMatch::Exact));
    }

    #[test]
    fn test_doorbell_suffix() {
        let noisy = Command::decode("DOORBELL_PRESSED=nottrue");
        assert!(noisy.pressed_value(DoorbellMatch::Suffix));
        assert!(!Command::decode("DOORBELL_PRESSED=1").pressed_value(DoorbellMatch::Suffix));
    }

    #[test]
    fn test_display_round_trips_known_lines() {
        assert_eq!(Command::decode("HUMIDITY=40").to_string(), "HUMIDITY=40");
        assert_eq!(Command::decode("garbage").to_string(), "garbage");
    }

    #[test]
    fn test_request_encoding() {
        assert_eq!(Request::TypeId.encode(), b"TYPEID\n");
        assert_eq!(Request::CurrentValues.encode(), b"CURRENTVALUES\n");
        assert_eq!(Request::Refresh.encode(), b"REFRESH\n");
        assert_eq!(Request::SwitchOn.encode(), b"ON\n");
        assert_eq!(Request::SwitchOff.encode(), b"OFF\n");
    }
}
