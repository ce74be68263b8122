//! Field drivers.
//!
//! A driver owns a set of points. It reports values into the store and
//! accepts control writes for the writable points it owns. This module
//! defines the [`Driver`] trait the control dispatcher calls, a registry of
//! named drivers, and an in-process [`LoopbackDriver`] that echoes writes.

use crate::store::PointStore;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pointhub_protocol::PointValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Writes a [`LoopbackDriver`] keeps for inspection.
pub const LOOPBACK_WRITE_HISTORY: usize = 64;

/// Driver errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The device refused the write.
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// The device could not be reached.
    #[error("Driver unavailable: {0}")]
    Unavailable(String),

    /// A driver with this name is already registered.
    #[error("Driver already registered: {0}")]
    AlreadyRegistered(String),

    /// No driver with this name is registered.
    #[error("Driver not registered: {0}")]
    NotRegistered(String),
}

/// A source of point values and sink for control writes.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Unique driver name; points name their owner by it.
    fn name(&self) -> &str;

    /// Write a value to the device behind `id`.
    ///
    /// The value has already been converted to the point's declared type.
    /// Returning `Ok` means the device accepted the write.
    async fn write_point(&self, id: &str, value: &PointValue) -> Result<(), DriverError>;
}

/// Named drivers available for control dispatch.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: DashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken.
    pub fn register(&self, driver: Arc<dyn Driver>) -> Result<(), DriverError> {
        let name = driver.name().to_string();
        match self.drivers.entry(name.clone()) {
            Entry::Occupied(_) => Err(DriverError::AlreadyRegistered(name)),
            Entry::Vacant(slot) => {
                slot.insert(driver);
                info!(driver = %name, "Driver registered");
                Ok(())
            }
        }
    }

    /// Look up a driver by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(name).map(|d| Arc::clone(d.value()))
    }

    /// Remove a driver and every point it owns from `store`.
    ///
    /// Returns the number of points removed.
    ///
    /// # Errors
    ///
    /// Returns an error if no driver has this name.
    pub fn deregister(&self, name: &str, store: &PointStore) -> Result<usize, DriverError> {
        if self.drivers.remove(name).is_none() {
            return Err(DriverError::NotRegistered(name.to_string()));
        }
        let removed = store.remove_driver_points(name);
        info!(driver = %name, points = removed, "Driver deregistered");
        Ok(removed)
    }

    /// Check if a driver is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// Registered driver names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.iter().map(|d| d.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered drivers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Check if no driver is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

/// A driver with no device behind it.
///
/// Writes succeed after an optional delay. The most recent
/// [`LOOPBACK_WRITE_HISTORY`] writes are kept along with a running total.
/// Useful for simulation setups and for exercising the control path.
#[derive(Debug)]
pub struct LoopbackDriver {
    name: String,
    write_delay: Duration,
    reject: AtomicBool,
    write_count: AtomicU64,
    recent: Mutex<VecDeque<(String, PointValue)>>,
}

impl LoopbackDriver {
    /// Create a loopback driver.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            write_delay: Duration::ZERO,
            reject: AtomicBool::new(false),
            write_count: AtomicU64::new(0),
            recent: Mutex::new(VecDeque::with_capacity(LOOPBACK_WRITE_HISTORY)),
        }
    }

    /// Delay every write by `delay`.
    #[must_use]
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::Relaxed);
    }

    /// Most recent accepted writes, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<(String, PointValue)> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Total writes accepted since creation.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Driver for LoopbackDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write_point(&self, id: &str, value: &PointValue) -> Result<(), DriverError> {
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        if self.reject.load(Ordering::Relaxed) {
            return Err(DriverError::Rejected(format!("{} refuses writes", self.name)));
        }

        debug!(driver = %self.name, point = %id, value = %value, "Loopback write");
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        if recent.len() == LOOPBACK_WRITE_HISTORY {
            recent.pop_front();
        }
        recent.push_back((id.to_string(), value.clone()));
        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointhub_protocol::api::ValueReport;

    #[test]
    fn test_register_and_lookup() {
        let drivers = DriverRegistry::new();
        drivers.register(Arc::new(LoopbackDriver::new("sim"))).unwrap();

        assert!(drivers.contains("sim"));
        assert_eq!(drivers.get("sim").unwrap().name(), "sim");
        assert!(drivers.get("plc").is_none());
        assert!(matches!(
            drivers.register(Arc::new(LoopbackDriver::new("sim"))),
            Err(DriverError::AlreadyRegistered(_))
        ));
        assert_eq!(drivers.names(), vec!["sim".to_string()]);
    }

    #[test]
    fn test_deregister_removes_owned_points() {
        let (store, _events) = PointStore::new();
        let drivers = DriverRegistry::new();
        drivers.register(Arc::new(LoopbackDriver::new("plc1"))).unwrap();
        drivers.register(Arc::new(LoopbackDriver::new("plc2"))).unwrap();

        store.report("plc1", ValueReport::new("a.x", 1i64));
        store.report("plc2", ValueReport::new("b.x", 2i64));

        assert_eq!(drivers.deregister("plc1", &store).unwrap(), 1);
        assert!(store.get("a.x").is_none());
        assert!(store.get("b.x").is_some());
        assert!(matches!(
            drivers.deregister("plc1", &store),
            Err(DriverError::NotRegistered(_))
        ));
        assert_eq!(drivers.len(), 1);
    }

    #[tokio::test]
    async fn test_loopback_records_and_rejects() {
        let driver = LoopbackDriver::new("sim");
        driver.write_point("a.b", &PointValue::Int(3)).await.unwrap();

        driver.set_reject(true);
        assert!(matches!(
            driver.write_point("a.b", &PointValue::Int(4)).await,
            Err(DriverError::Rejected(_))
        ));

        assert_eq!(
            driver.writes(),
            vec![("a.b".to_string(), PointValue::Int(3))]
        );
        assert_eq!(driver.write_count(), 1);
    }

    #[tokio::test]
    async fn test_loopback_history_is_bounded() {
        let driver = LoopbackDriver::new("sim");
        let total = LOOPBACK_WRITE_HISTORY as i64 * 3;
        for i in 0..total {
            driver.write_point("a.b", &PointValue::Int(i)).await.unwrap();
        }

        let writes = driver.writes();
        assert_eq!(writes.len(), LOOPBACK_WRITE_HISTORY);
        assert_eq!(
            writes.first().unwrap().1,
            PointValue::Int(total - LOOPBACK_WRITE_HISTORY as i64)
        );
        assert_eq!(writes.last().unwrap().1, PointValue::Int(total - 1));
        assert_eq!(driver.write_count(), total as u64);
    }
}
