//! Subscription registry.
//!
//! Tracks which prefixes each open connection subscribed to and resolves a
//! point ID to the connections that must receive its updates.
//!
//! Locking: a connection's entry lock is always taken before the prefix
//! index lock, never the other way around. Closing a connection removes its
//! entry atomically, so a concurrent subscribe either lands before the close
//! (and is cleaned up by it) or fails with [`RegistryError::ConnectionClosed`].

use crate::connection::{outbound, ConnectionId, Outbound, OutboundReceiver};
use crate::point::now_millis;
use crate::prefix::PrefixIndex;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Maximum prefix length.
pub const MAX_PREFIX_LENGTH: usize = 512;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Invalid prefix.
    #[error("Invalid prefix: {0}")]
    InvalidPrefix(&'static str),

    /// The connection is not open (never opened, or already closed).
    #[error("Connection not open: {0}")]
    ConnectionClosed(ConnectionId),

    /// The connection ID is already registered.
    #[error("Connection already open: {0}")]
    AlreadyOpen(ConnectionId),

    /// Maximum subscriptions reached for this connection.
    #[error("Maximum subscriptions per connection reached ({0})")]
    MaxSubscriptionsReached(usize),

    /// Maximum number of open connections reached.
    #[error("Maximum connections reached ({0})")]
    MaxConnectionsReached(usize),
}

/// Validate a subscription prefix.
///
/// The empty prefix is valid and matches every point.
///
/// # Errors
///
/// Returns an error message if the prefix is invalid.
pub fn validate_prefix(prefix: &str) -> Result<(), &'static str> {
    if prefix.len() > MAX_PREFIX_LENGTH {
        return Err("Prefix too long");
    }
    if prefix.chars().any(char::is_control) {
        return Err("Prefix contains control characters");
    }
    Ok(())
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of open connections.
    pub max_connections: usize,
    /// Maximum prefixes per connection.
    pub max_subscriptions_per_connection: usize,
    /// Outbound queue capacity per connection.
    pub outbound_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
            max_subscriptions_per_connection: 1_000,
            outbound_capacity: crate::connection::DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// A (connection, prefix) subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Owning connection.
    pub connection: ConnectionId,
    /// Subscribed prefix.
    pub prefix: String,
    /// When the subscription was created (Unix milliseconds).
    pub created_at: u64,
}

struct ConnectionEntry {
    outbound: Outbound,
    /// Prefix -> creation time.
    prefixes: HashMap<String, u64>,
}

/// Registry statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Open connections.
    pub connection_count: usize,
    /// Total (connection, prefix) subscriptions.
    pub total_subscriptions: usize,
    /// Distinct subscribed prefixes.
    pub distinct_prefixes: usize,
}

/// The subscription registry.
pub struct SubscriptionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    index: RwLock<PrefixIndex<ConnectionId>>,
    config: RegistryConfig,
}

impl SubscriptionRegistry {
    /// Create a registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating subscription registry with config: {:?}", config);
        Self {
            connections: DashMap::new(),
            index: RwLock::new(PrefixIndex::new()),
            config,
        }
    }

    /// Register an open connection and create its outbound queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is already registered or the connection
    /// limit is reached.
    pub fn open(&self, connection: ConnectionId) -> Result<OutboundReceiver, RegistryError> {
        if self.connections.len() >= self.config.max_connections {
            return Err(RegistryError::MaxConnectionsReached(
                self.config.max_connections,
            ));
        }

        match self.connections.entry(connection.clone()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyOpen(connection)),
            Entry::Vacant(slot) => {
                let (tx, rx) = outbound(connection.clone(), self.config.outbound_capacity);
                slot.insert(ConnectionEntry {
                    outbound: tx,
                    prefixes: HashMap::new(),
                });
                debug!(connection = %connection, "Connection opened");
                Ok(rx)
            }
        }
    }

    /// Check if a connection is open.
    #[must_use]
    pub fn is_open(&self, connection: &ConnectionId) -> bool {
        self.connections.contains_key(connection)
    }

    /// Subscribe a connection to a prefix.
    ///
    /// Subscribing to a prefix the connection already holds is a no-op and
    /// returns `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is invalid, the connection is not open,
    /// or the per-connection limit is reached.
    pub fn subscribe(&self, connection: &ConnectionId, prefix: &str) -> Result<bool, RegistryError> {
        validate_prefix(prefix).map_err(RegistryError::InvalidPrefix)?;

        let mut entry = self
            .connections
            .get_mut(connection)
            .ok_or_else(|| RegistryError::ConnectionClosed(connection.clone()))?;

        if entry.prefixes.contains_key(prefix) {
            trace!(connection = %connection, prefix = %prefix, "Already subscribed");
            return Ok(false);
        }
        if entry.prefixes.len() >= self.config.max_subscriptions_per_connection {
            return Err(RegistryError::MaxSubscriptionsReached(
                self.config.max_subscriptions_per_connection,
            ));
        }

        entry.prefixes.insert(prefix.to_string(), now_millis());
        self.index_write()
            .insert_subscription_prefix(prefix, connection.clone());

        debug!(
            connection = %connection,
            prefix = %prefix,
            subscriptions = entry.prefixes.len(),
            "Subscribed"
        );
        Ok(true)
    }

    /// Drop a prefix subscription.
    ///
    /// Returns `false` if the connection did not hold the prefix; that case
    /// is benign and not an error.
    pub fn unsubscribe(&self, connection: &ConnectionId, prefix: &str) -> bool {
        let Some(mut entry) = self.connections.get_mut(connection) else {
            return false;
        };
        if entry.prefixes.remove(prefix).is_none() {
            trace!(connection = %connection, prefix = %prefix, "Unsubscribe of unknown prefix");
            return false;
        }

        self.index_write()
            .remove_subscription_prefix(prefix, connection);
        debug!(
            connection = %connection,
            prefix = %prefix,
            subscriptions = entry.prefixes.len(),
            "Unsubscribed"
        );
        true
    }

    /// Tear down a connection and every subscription it holds.
    ///
    /// Safe to call more than once; only the first call removes anything.
    /// Returns the number of subscriptions removed.
    pub fn on_connection_closed(&self, connection: &ConnectionId) -> usize {
        let Some((_, entry)) = self.connections.remove(connection) else {
            return 0;
        };

        let mut index = self.index_write();
        for prefix in entry.prefixes.keys() {
            index.remove_subscription_prefix(prefix, connection);
        }
        drop(index);

        debug!(
            connection = %connection,
            removed = entry.prefixes.len(),
            "Connection closed, subscriptions removed"
        );
        entry.prefixes.len()
    }

    /// Outbound queues of every connection subscribed to a prefix of `id`.
    ///
    /// Each connection appears once even if several of its prefixes match.
    #[must_use]
    pub fn subscribers_for(&self, id: &str) -> Vec<Outbound> {
        let holders = self.matching_connections(id);
        holders
            .iter()
            .filter_map(|c| self.connections.get(c).map(|e| e.outbound.clone()))
            .collect()
    }

    /// IDs of every connection subscribed to a prefix of `id`.
    #[must_use]
    pub fn matching_connections(&self, id: &str) -> HashSet<ConnectionId> {
        self.index_read().holders_matching(id)
    }

    /// Check if a connection holds a prefix.
    #[must_use]
    pub fn is_subscribed(&self, connection: &ConnectionId, prefix: &str) -> bool {
        self.connections
            .get(connection)
            .map(|e| e.prefixes.contains_key(prefix))
            .unwrap_or(false)
    }

    /// Subscriptions held by a connection, ordered by prefix.
    #[must_use]
    pub fn subscriptions(&self, connection: &ConnectionId) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .connections
            .get(connection)
            .map(|e| {
                e.prefixes
                    .iter()
                    .map(|(prefix, created_at)| Subscription {
                        connection: connection.clone(),
                        prefix: prefix.clone(),
                        created_at: *created_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        subs.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        subs
    }

    /// Number of holders of exactly `prefix`.
    #[must_use]
    pub fn prefix_refcount(&self, prefix: &str) -> usize {
        self.index_read().refcount(prefix)
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connection_count: self.connections.len(),
            total_subscriptions: self.connections.iter().map(|e| e.prefixes.len()).sum(),
            distinct_prefixes: self.index_read().len(),
        }
    }

    fn index_read(&self) -> RwLockReadGuard<'_, PrefixIndex<ConnectionId>> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_write(&self) -> RwLockWriteGuard<'_, PrefixIndex<ConnectionId>> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
