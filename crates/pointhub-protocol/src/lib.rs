//! # pointhub-protocol
//!
//! Wire protocol definitions for the pointhub point-data hub.
//!
//! This crate defines what travels between pointhub and its clients:
//!
//! - **Values** - Typed scalars (`bool`, `int`, `float`, `text`) and conversion
//! - **WebSocket** - `SUBSCRIBE`/`UNSUBSCRIBE`/`PING` commands and pushed JSON events
//! - **HTTP** - Request/response bodies for the query, control and report endpoints
//!
//! ## Example
//!
//! ```rust
//! use pointhub_protocol::{codec, ClientCommand, PointValue, ServerEvent};
//!
//! let cmd = codec::decode_command("SUBSCRIBE area1.").unwrap();
//! assert_eq!(cmd, ClientCommand::subscribe("area1."));
//!
//! let event = ServerEvent::PointUpdate {
//!     id: "area1.pump.speed".to_string(),
//!     value: PointValue::Float(1450.0),
//!     timestamp: 1_700_000_000_000,
//!     driver: "modbus".to_string(),
//!     device: Some("pump".to_string()),
//!     version: 7,
//! };
//! let text = codec::encode(&event).unwrap();
//! assert_eq!(codec::decode(&text).unwrap(), event);
//! ```

pub mod api;
pub mod codec;
pub mod frames;
pub mod value;

pub use codec::{decode, decode_command, encode, ProtocolError};
pub use frames::{ClientCommand, ServerEvent, PONG};
pub use value::{PointValue, ValueError, ValueType};
