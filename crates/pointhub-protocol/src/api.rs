//! HTTP request and response bodies.
//!
//! Field names are camelCase on the wire (`pointIds`, `pointId`).

use crate::value::{PointValue, ValueType};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Marker stored for IDs a batch query could not resolve.
pub const NOT_FOUND: &str = "NOT_FOUND";

/// A point as returned by the query endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointView {
    /// Point ID.
    pub id: String,
    /// Current value.
    pub value: PointValue,
    /// Declared value type.
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Last update timestamp (Unix milliseconds).
    pub timestamp: u64,
    /// Whether control commands are accepted.
    pub writable: bool,
    /// Owning driver.
    pub driver: String,
    /// Device the point belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Update counter.
    pub version: u64,
}

/// `POST /api/v1/points/batch` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    /// IDs to resolve.
    pub point_ids: Vec<String>,
}

/// Per-ID outcome of a batch query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchEntry {
    /// The point exists.
    Found(PointView),
    /// The point does not exist.
    Missing {
        /// Always [`NOT_FOUND`].
        error: String,
    },
}

impl BatchEntry {
    /// Entry for an unknown ID.
    #[must_use]
    pub fn missing() -> Self {
        BatchEntry::Missing {
            error: NOT_FOUND.to_string(),
        }
    }

    /// The resolved point, if any.
    #[must_use]
    pub fn point(&self) -> Option<&PointView> {
        match self {
            BatchEntry::Found(p) => Some(p),
            BatchEntry::Missing { .. } => None,
        }
    }
}

/// `POST /api/v1/points/batch` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Outcome keyed by requested ID.
    pub points: BTreeMap<String, BatchEntry>,
}

/// `GET /api/v1/points` query string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrefixQuery {
    /// Raw string prefix; absent means all points.
    #[serde(default)]
    pub prefix: String,
}

/// `GET /api/v1/points` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointsResponse {
    /// Matching points, ordered by ID.
    pub points: Vec<PointView>,
}

/// `POST /api/v1/control` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    /// Target point.
    pub point_id: String,
    /// Requested value as text. JSON numbers and booleans are accepted too.
    #[serde(deserialize_with = "scalar_as_string")]
    pub value: String,
}

/// `POST /api/v1/control` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    /// Whether the driver acknowledged the write.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Error code from the control taxonomy, on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Target point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_id: Option<String>,
    /// Value written, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<PointValue>,
    /// Timestamp applied to the point, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl ControlResponse {
    /// Failure response.
    #[must_use]
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(code.into()),
            point_id: None,
            value: None,
            timestamp: None,
        }
    }
}

/// One value reported by a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueReport {
    /// Point ID.
    pub id: String,
    /// Reported value.
    pub value: PointValue,
    /// Sample timestamp (Unix milliseconds); 0 means "now".
    #[serde(default)]
    pub timestamp: u64,
    /// Device the point belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl ValueReport {
    /// Create a report stamped at receipt time.
    #[must_use]
    pub fn new(id: impl Into<String>, value: impl Into<PointValue>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            timestamp: 0,
            device: None,
        }
    }

    /// Set an explicit sample timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// `POST /api/v1/drivers/{driver}/reports` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportResponse {
    /// Reports handed to the store.
    pub accepted: usize,
    /// Reports that changed a value.
    pub changed: usize,
}

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the server answers.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Points in the store.
    pub points: usize,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Active (connection, prefix) subscriptions.
    pub subscriptions: usize,
    /// Point lookups served by the store.
    pub reads: u64,
    /// Writes applied by the store.
    pub writes: u64,
    /// Timestamp of the most recent write (Unix milliseconds).
    pub last_write_ts: u64,
}

/// Accept a JSON string, number or boolean as its textual form.
fn scalar_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(de::Error::custom(format!(
            "expected a scalar value, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_request_camel_case() {
        let req: BatchRequest =
            serde_json::from_str(r#"{"pointIds":["test.point1","test.point2"]}"#).unwrap();
        assert_eq!(req.point_ids, vec!["test.point1", "test.point2"]);
    }

    #[test]
    fn test_control_value_accepts_scalars() {
        let req: ControlRequest =
            serde_json::from_str(r#"{"pointId":"a.b","value":"2"}"#).unwrap();
        assert_eq!(req.value, "2");

        let req: ControlRequest = serde_json::from_str(r#"{"pointId":"a.b","value":2}"#).unwrap();
        assert_eq!(req.value, "2");

        let req: ControlRequest =
            serde_json::from_str(r#"{"pointId":"a.b","value":true}"#).unwrap();
        assert_eq!(req.value, "true");

        assert!(serde_json::from_str::<ControlRequest>(r#"{"pointId":"a.b","value":[1]}"#).is_err());
        assert!(serde_json::from_str::<ControlRequest>(r#"{"pointId":"a.b"}"#).is_err());
    }

    #[test]
    fn test_missing_entry_shape() {
        let json = serde_json::to_value(BatchEntry::missing()).unwrap();
        assert_eq!(json, serde_json::json!({"error": "NOT_FOUND"}));
        assert!(BatchEntry::missing().point().is_none());
    }

    #[test]
    fn test_value_report_defaults() {
        let report: ValueReport = serde_json::from_str(r#"{"id":"a.b","value":1.5}"#).unwrap();
        assert_eq!(report.timestamp, 0);
        assert_eq!(report.value, PointValue::Float(1.5));
        assert!(report.device.is_none());
    }
}
