//! # pointhub-core
//!
//! Point store, subscriptions and update routing for the pointhub hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Store** - Sharded map of current point values with prefix queries
//! - **Prefix** - Trie matching point IDs against subscribed prefixes
//! - **Registry** - Per-connection subscriptions and outbound queues
//! - **Control** - Validated writes routed to the owning driver
//! - **Fanout** - Pushes change events to matching connections
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  report   ┌─────────────┐  ChangeEvent  ┌─────────────┐
//! │   Driver    │──────────▶│    Store    │──────────────▶│   Fanout    │
//! └─────────────┘           └─────────────┘               └─────────────┘
//!        ▲                         ▲                             │
//!        │ write_point             │ upsert                      ▼
//! ┌─────────────┐                  │                      ┌─────────────┐
//! │   Control   │──────────────────┘                      │  Registry   │
//! └─────────────┘                                         └─────────────┘
//!                                                                │
//!                                                                ▼
//!                                                        outbound queues
//! ```

pub mod connection;
pub mod control;
pub mod driver;
pub mod fanout;
pub mod hub;
pub mod point;
pub mod prefix;
pub mod registry;
pub mod store;

pub use connection::{ConnectionId, ConnectionState, Delivery, Outbound, OutboundReceiver};
pub use control::{ControlAck, ControlDispatcher, ControlError};
pub use driver::{Driver, DriverError, DriverRegistry, LoopbackDriver};
pub use fanout::{FanoutPump, FanoutStats};
pub use hub::{Hub, HubConfig};
pub use point::{ChangeEvent, Point, PointDefinition, PointId};
pub use prefix::PrefixIndex;
pub use registry::{RegistryConfig, RegistryError, Subscription, SubscriptionRegistry};
pub use store::{PointStore, StoreConfig, StoreStats};
