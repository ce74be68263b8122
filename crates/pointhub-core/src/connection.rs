//! Connection handles and per-connection outbound queues.
//!
//! The core never owns a client connection. It holds an [`Outbound`] handle
//! per connection and pushes encoded messages into it; the transport task
//! drains the matching [`OutboundReceiver`].
//!
//! Each queue is a bounded `broadcast` ring with a single receiver. When a
//! slow client lets the ring fill up, the oldest messages are overwritten and
//! the receiver observes [`Delivery::Lagged`]. Producers never wait.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::point::now_millis;

/// Default outbound queue capacity per connection.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", now_millis(), counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Transport accepted, not yet registered.
    Connecting,
    /// Registered; may hold subscriptions and receive deliveries.
    Open,
    /// Torn down; subscriptions have been removed.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbound {
    connection: ConnectionId,
    sender: broadcast::Sender<Arc<str>>,
}

impl Outbound {
    /// Connection this queue belongs to.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection
    }

    /// Enqueue an encoded message without waiting.
    ///
    /// Returns `false` if the receiving side is gone.
    pub fn deliver(&self, message: Arc<str>) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// Something taken off an outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// An encoded message to write to the client.
    Message(Arc<str>),
    /// The queue overflowed and this many of the oldest messages were dropped.
    Lagged(u64),
}

/// Receiving half of a connection's outbound queue.
#[derive(Debug)]
pub struct OutboundReceiver {
    receiver: broadcast::Receiver<Arc<str>>,
}

impl OutboundReceiver {
    /// Wait for the next delivery.
    ///
    /// Returns `None` once the sending side has been dropped and the queue is
    /// drained.
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.receiver.recv().await {
            Ok(message) => Some(Delivery::Message(message)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(Delivery::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Take a delivery if one is ready.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        match self.receiver.try_recv() {
            Ok(message) => Some(Delivery::Message(message)),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Some(Delivery::Lagged(n)),
            Err(_) => None,
        }
    }
}

/// Create a bounded outbound queue for `connection`.
#[must_use]
pub fn outbound(connection: ConnectionId, capacity: usize) -> (Outbound, OutboundReceiver) {
    let (sender, receiver) = broadcast::channel(capacity.max(1));
    (
        Outbound { connection, sender },
        OutboundReceiver { receiver },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_deliver_and_receive_in_order() {
        let (tx, mut rx) = outbound("conn-1".into(), 8);
        assert!(tx.deliver(Arc::from("one")));
        assert!(tx.deliver(Arc::from("two")));
        assert_eq!(rx.try_recv(), Some(Delivery::Message(Arc::from("one"))));
        assert_eq!(rx.try_recv(), Some(Delivery::Message(Arc::from("two"))));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let (tx, mut rx) = outbound("conn-1".into(), 2);
        for msg in ["1", "2", "3", "4"] {
            tx.deliver(Arc::from(msg));
        }
        assert_eq!(rx.try_recv(), Some(Delivery::Lagged(2)));
        assert_eq!(rx.try_recv(), Some(Delivery::Message(Arc::from("3"))));
        assert_eq!(rx.try_recv(), Some(Delivery::Message(Arc::from("4"))));
    }

    #[tokio::test]
    async fn test_recv_ends_when_sender_dropped() {
        let (tx, mut rx) = outbound("conn-1".into(), 4);
        tx.deliver(Arc::from("last"));
        drop(tx);
        assert_eq!(rx.recv().await, Some(Delivery::Message(Arc::from("last"))));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_deliver_without_receiver() {
        let (tx, rx) = outbound("conn-1".into(), 4);
        drop(rx);
        assert!(!tx.deliver(Arc::from("lost")));
    }
}
