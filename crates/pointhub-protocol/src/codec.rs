//! Codec for encoding and decoding pointhub WebSocket messages.
//!
//! Server events are JSON text, one complete object per frame. Client
//! commands are single lines of text.

use thiserror::Error;

use crate::frames::{ClientCommand, ServerEvent};

/// Maximum encoded server event size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum client command length in bytes.
pub const MAX_COMMAND_LENGTH: usize = 4096;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Command exceeds maximum length.
    #[error("Command length {0} exceeds maximum {MAX_COMMAND_LENGTH}")]
    CommandTooLong(usize),

    /// Text frame is not a known command.
    #[error("Unknown command: {0:?}")]
    UnknownCommand(String),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a server event to a text frame.
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode(event: &ServerEvent) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(event)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a server event from a text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or not a valid event.
pub fn decode(text: &str) -> Result<ServerEvent, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(serde_json::from_str(text)?)
}

/// Decode a client command from a text frame.
///
/// # Errors
///
/// Returns an error if the command is too long or unknown.
pub fn decode_command(text: &str) -> Result<ClientCommand, ProtocolError> {
    if text.len() > MAX_COMMAND_LENGTH {
        return Err(ProtocolError::CommandTooLong(text.len()));
    }

    ClientCommand::parse(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PointValue;

    #[test]
    fn test_encode_is_single_json_object() {
        let event = ServerEvent::PointUpdate {
            id: "test.point1".to_string(),
            value: PointValue::Float(21.5),
            timestamp: 42,
            driver: "modbus".to_string(),
            device: None,
            version: 1,
        };
        let text = encode(&event).unwrap();
        assert!(text.starts_with('{') && text.ends_with('}'));
        assert!(!text.contains('\n'));
        assert_eq!(decode(&text).unwrap(), event);
    }

    #[test]
    fn test_frame_too_large() {
        let event = ServerEvent::error("x".repeat(MAX_FRAME_SIZE + 1));

        match encode(&event) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_command_limits() {
        let long = format!("SUBSCRIBE {}", "a".repeat(MAX_COMMAND_LENGTH));
        match decode_command(&long) {
            Err(ProtocolError::CommandTooLong(_)) => {}
            other => panic!("Expected CommandTooLong error, got {:?}", other),
        }

        match decode_command("HELLO") {
            Err(ProtocolError::UnknownCommand(cmd)) => assert_eq!(cmd, "HELLO"),
            other => panic!("Expected UnknownCommand error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Json(_))));
    }
}
