//! WebSocket message types for the pointhub protocol.
//!
//! Clients speak a line-oriented text protocol (`SUBSCRIBE <prefix>`,
//! `UNSUBSCRIBE <prefix>`, `PING`). The server answers with self-contained
//! JSON objects, one per text frame.

use crate::codec::ProtocolError;
use crate::value::PointValue;
use serde::{Deserialize, Serialize};

/// Verb for subscribing to a prefix.
pub const SUBSCRIBE: &str = "SUBSCRIBE";

/// Verb for dropping a prefix subscription.
pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";

/// Keepalive request.
pub const PING: &str = "PING";

/// Keepalive reply, sent as plain text.
pub const PONG: &str = "PONG";

/// A command sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Receive all future changes to points whose ID starts with `prefix`.
    ///
    /// An empty prefix subscribes to every point.
    Subscribe {
        /// Raw string prefix.
        prefix: String,
    },

    /// Stop receiving changes for `prefix`.
    Unsubscribe {
        /// Raw string prefix.
        prefix: String,
    },

    /// Keepalive.
    Ping,
}

impl ClientCommand {
    /// Create a Subscribe command.
    #[must_use]
    pub fn subscribe(prefix: impl Into<String>) -> Self {
        ClientCommand::Subscribe {
            prefix: prefix.into(),
        }
    }

    /// Create an Unsubscribe command.
    #[must_use]
    pub fn unsubscribe(prefix: impl Into<String>) -> Self {
        ClientCommand::Unsubscribe {
            prefix: prefix.into(),
        }
    }

    /// Parse a text frame into a command.
    ///
    /// The prefix is everything after the first space, kept verbatim apart
    /// from a trailing line terminator. `SUBSCRIBE` with no argument means
    /// the empty prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownCommand`] for anything else.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let line = text.trim_end_matches(['\r', '\n']);

        if line == PING {
            return Ok(ClientCommand::Ping);
        }
        if let Some(prefix) = argument(line, UNSUBSCRIBE) {
            return Ok(ClientCommand::unsubscribe(prefix));
        }
        if let Some(prefix) = argument(line, SUBSCRIBE) {
            return Ok(ClientCommand::subscribe(prefix));
        }

        Err(ProtocolError::UnknownCommand(line.to_string()))
    }

    /// Render the command as the text frame a client sends.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            ClientCommand::Subscribe { prefix } => format!("{SUBSCRIBE} {prefix}"),
            ClientCommand::Unsubscribe { prefix } => format!("{UNSUBSCRIBE} {prefix}"),
            ClientCommand::Ping => PING.to_string(),
        }
    }
}

/// Split `VERB <arg>` into `<arg>`; `VERB` alone yields an empty argument.
fn argument<'a>(line: &'a str, verb: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(verb)?;
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix(' ')
    }
}

/// A message pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// A point changed value.
    #[serde(rename = "POINT_UPDATE")]
    PointUpdate {
        /// Point ID.
        id: String,
        /// New value.
        value: PointValue,
        /// Update timestamp (Unix milliseconds).
        timestamp: u64,
        /// Driver that owns the point.
        driver: String,
        /// Device the point belongs to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<String>,
        /// Per-point update counter.
        version: u64,
    },

    /// A client command was rejected.
    #[serde(rename = "ERROR")]
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ServerEvent {
    /// Create an Error event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Point ID carried by an update, if any.
    #[must_use]
    pub fn point_id(&self) -> Option<&str> {
        match self {
            ServerEvent::PointUpdate { id, .. } => Some(id),
            ServerEvent::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            ClientCommand::parse("SUBSCRIBE test.").unwrap(),
            ClientCommand::subscribe("test.")
        );
        assert_eq!(
            ClientCommand::parse("UNSUBSCRIBE test.\r\n").unwrap(),
            ClientCommand::unsubscribe("test.")
        );
        assert_eq!(ClientCommand::parse("PING").unwrap(), ClientCommand::Ping);
    }

    #[test]
    fn test_parse_empty_prefix() {
        assert_eq!(
            ClientCommand::parse("SUBSCRIBE ").unwrap(),
            ClientCommand::subscribe("")
        );
        assert_eq!(
            ClientCommand::parse("SUBSCRIBE").unwrap(),
            ClientCommand::subscribe("")
        );
    }

    #[test]
    fn test_prefix_kept_verbatim() {
        assert_eq!(
            ClientCommand::parse("SUBSCRIBE  a b").unwrap(),
            ClientCommand::subscribe(" a b")
        );
    }

    #[test]
    fn test_parse_unknown() {
        assert!(ClientCommand::parse("SUBSCRIBEtest").is_err());
        assert!(ClientCommand::parse("subscribe test").is_err());
        assert!(ClientCommand::parse("").is_err());
    }

    #[test]
    fn test_to_text() {
        assert_eq!(ClientCommand::subscribe("a.").to_text(), "SUBSCRIBE a.");
        assert_eq!(ClientCommand::unsubscribe("").to_text(), "UNSUBSCRIBE ");
    }

    #[test]
    fn test_point_update_shape() {
        let event = ServerEvent::PointUpdate {
            id: "a.b".to_string(),
            value: PointValue::Int(2),
            timestamp: 1_700_000_000_000,
            driver: "plc1".to_string(),
            device: None,
            version: 3,
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "POINT_UPDATE");
        assert_eq!(json["id"], "a.b");
        assert_eq!(json["value"], 2);
        assert!(json.get("device").is_none());
        assert_eq!(event.point_id(), Some("a.b"));
    }

    #[test]
    fn test_point_update_carries_device() {
        let event = ServerEvent::PointUpdate {
            id: "st1.pump3.speed".to_string(),
            value: PointValue::Float(1450.0),
            timestamp: 1,
            driver: "modbus".to_string(),
            device: Some("pump3".to_string()),
            version: 1,
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["device"], "pump3");

        let parsed: ServerEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }
}
