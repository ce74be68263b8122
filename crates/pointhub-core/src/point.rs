//! Point records and change events.

use pointhub_protocol::api::PointView;
use pointhub_protocol::{PointValue, ServerEvent, ValueType};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A point identifier, e.g. `area.device.signal`.
pub type PointId = String;

/// Current wall-clock time in Unix milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The current state of a point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Unique, immutable identifier.
    pub id: PointId,
    /// Current value.
    pub value: PointValue,
    /// Declared value type; reports and control values convert to it.
    pub value_type: ValueType,
    /// Last update timestamp (Unix milliseconds).
    pub timestamp: u64,
    /// Whether control commands are accepted.
    pub writable: bool,
    /// Name of the owning driver.
    pub driver: String,
    /// Device the point belongs to.
    pub device: Option<String>,
    /// Number of value changes applied; 0 until the first value arrives.
    pub version: u64,
}

impl Point {
    /// Whether the point has received a value since registration.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.version > 0
    }

    /// Render the point for the HTTP API.
    #[must_use]
    pub fn view(&self) -> PointView {
        PointView::from(self)
    }
}

impl From<&Point> for PointView {
    fn from(p: &Point) -> Self {
        PointView {
            id: p.id.clone(),
            value: p.value.clone(),
            value_type: p.value_type,
            timestamp: p.timestamp,
            writable: p.writable,
            driver: p.driver.clone(),
            device: p.device.clone(),
            version: p.version,
        }
    }
}

/// Static description of a point, used to pre-register it before any
/// driver reports a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointDefinition {
    /// Point ID.
    pub id: PointId,
    /// Declared value type.
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Whether control commands are accepted.
    #[serde(default)]
    pub writable: bool,
    /// Owning driver.
    #[serde(default)]
    pub driver: String,
    /// Device the point belongs to.
    #[serde(default)]
    pub device: Option<String>,
    /// Value to start with.
    #[serde(default)]
    pub initial: Option<PointValue>,
}

impl PointDefinition {
    /// Create a read-only definition with no owner.
    #[must_use]
    pub fn new(id: impl Into<PointId>, value_type: ValueType) -> Self {
        Self {
            id: id.into(),
            value_type,
            writable: false,
            driver: String::new(),
            device: None,
            initial: None,
        }
    }

    /// Accept control commands.
    #[must_use]
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// Set the owning driver.
    #[must_use]
    pub fn owned_by(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Start with a value.
    #[must_use]
    pub fn with_initial(mut self, value: impl Into<PointValue>) -> Self {
        self.initial = Some(value.into());
        self
    }
}

/// Placeholder value for a point that has not been reported yet.
pub(crate) fn zero_value(value_type: ValueType) -> PointValue {
    match value_type {
        ValueType::Bool => PointValue::Bool(false),
        ValueType::Int => PointValue::Int(0),
        ValueType::Float => PointValue::Float(0.0),
        ValueType::Text => PointValue::Text(String::new()),
    }
}

/// Emitted by the store whenever a point's value actually changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Point ID.
    pub id: PointId,
    /// New value.
    pub value: PointValue,
    /// Update timestamp.
    pub timestamp: u64,
    /// Owning driver.
    pub driver: String,
    /// Device the point belongs to.
    pub device: Option<String>,
    /// Point version after the change.
    pub version: u64,
}

impl From<&Point> for ChangeEvent {
    fn from(p: &Point) -> Self {
        Self {
            id: p.id.clone(),
            value: p.value.clone(),
            timestamp: p.timestamp,
            driver: p.driver.clone(),
            device: p.device.clone(),
            version: p.version,
        }
    }
}

impl From<&ChangeEvent> for ServerEvent {
    fn from(e: &ChangeEvent) -> Self {
        ServerEvent::PointUpdate {
            id: e.id.clone(),
            value: e.value.clone(),
            timestamp: e.timestamp,
            driver: e.driver.clone(),
            device: e.device.clone(),
            version: e.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_builder() {
        let def = PointDefinition::new("a.b", ValueType::Int)
            .writable()
            .owned_by("plc1")
            .with_initial(1i64);
        assert!(def.writable);
        assert_eq!(def.driver, "plc1");
        assert_eq!(def.initial, Some(PointValue::Int(1)));
    }

    #[test]
    fn test_definition_from_toml_shape() {
        let def: PointDefinition = serde_json::from_str(
            r#"{"id":"test.control","type":"int","writable":true,"driver":"sim"}"#,
        )
        .unwrap();
        assert_eq!(def.value_type, ValueType::Int);
        assert!(def.initial.is_none());
    }

    #[test]
    fn test_change_event_to_server_event() {
        let event = ChangeEvent {
            id: "a.b".to_string(),
            value: PointValue::Int(2),
            timestamp: 10,
            driver: "plc1".to_string(),
            device: Some("rack2".to_string()),
            version: 2,
        };
        let pushed = ServerEvent::from(&event);
        assert_eq!(pushed.point_id(), Some("a.b"));
        assert!(matches!(
            pushed,
            ServerEvent::PointUpdate { device: Some(ref d), .. } if d == "rack2"
        ));
    }
}
