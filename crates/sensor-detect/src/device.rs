//! Device types known to discovery

use serde::{Deserialize, Serialize};

/// A device type that identification accepts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupportedType {
    /// Identifier reported by the firmware in `TYPEID=<id>`
    pub id: String,
    /// Human-readable label
    pub label: String,
}

impl SupportedType {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// The set of device types a discovery run is looking for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupportedTypes(Vec<SupportedType>);

impl SupportedTypes {
    pub fn new(types: Vec<SupportedType>) -> Self {
        Self(types)
    }

    /// Resolve a reported type id (exact, case-sensitive)
    pub fn find(&self, id: &str) -> Option<&SupportedType> {
        self.0.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Label for a type id, falling back to the id itself
    pub fn label_for<'a>(&'a self, id: &'a str) -> &'a str {
        self.find(id).map(|t| t.label.as_str()).unwrap_or(id)
    }
}

impl Default for SupportedTypes {
    fn default() -> Self {
        Self(vec![
            SupportedType::new("roomsensor", "Room Sensor"),
            SupportedType::new("doorbell", "Doorbell"),
        ])
    }
}

/// A device confirmed on a port by identification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Port name, the device's identity across scans
    pub port: String,
    /// Declared type id
    pub type_id: String,
    /// Label derived from the type
    pub label: String,
}

impl DiscoveredDevice {
    pub fn new(port: impl Into<String>, ty: &SupportedType) -> Self {
        Self {
            port: port.into(),
            type_id: ty.id.clone(),
            label: ty.label.clone(),
        }
    }

    /// Stable identifier built from type and port, e.g. `roomsensor:devttyACM0`
    pub fn uid(&self) -> String {
        let port: String = self
            .port
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        format!("{}:{}", self.type_id, port)
    }
}
