//! The point store.
//!
//! A sharded concurrent map from point ID to [`Point`], plus a sorted ID
//! index for prefix range scans. The store is the single source of truth for
//! point values. Every write that changes a value emits a [`ChangeEvent`]
//! while the point's shard lock is still held, so events for one point leave
//! the store in the order the writes were applied.

use crate::point::{now_millis, zero_value, ChangeEvent, Point, PointDefinition};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pointhub_protocol::api::ValueReport;
use pointhub_protocol::PointValue;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Store configuration.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Number of map shards; 0 picks the dashmap default. Other values are
    /// rounded up to a power of two.
    pub shard_amount: usize,
    /// Points to reserve room for.
    pub initial_capacity: usize,
}

/// Store counters (monitoring only, not strongly consistent).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Points currently stored.
    pub total_points: usize,
    /// Point lookups served.
    pub reads: u64,
    /// Writes applied (changed or not).
    pub writes: u64,
    /// Timestamp of the most recent write.
    pub last_write_ts: u64,
}

/// Concurrent point store.
pub struct PointStore {
    points: DashMap<String, Point>,
    ids: RwLock<BTreeSet<String>>,
    events: mpsc::UnboundedSender<ChangeEvent>,
    reads: AtomicU64,
    writes: AtomicU64,
    last_write_ts: AtomicU64,
}

impl PointStore {
    /// Create a store with default configuration.
    ///
    /// Returns the store and the stream of change events it emits.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChangeEvent>) {
        Self::with_config(StoreConfig::default())
    }

    /// Create a store with custom configuration.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> (Self, mpsc::UnboundedReceiver<ChangeEvent>) {
        info!("Creating point store with config: {:?}", config);
        let points = if config.shard_amount == 0 {
            DashMap::with_capacity(config.initial_capacity)
        } else {
            DashMap::with_capacity_and_shard_amount(
                config.initial_capacity,
                config.shard_amount.max(2).next_power_of_two(),
            )
        };
        let (events, rx) = mpsc::unbounded_channel();

        let store = Self {
            points,
            ids: RwLock::new(BTreeSet::new()),
            events,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            last_write_ts: AtomicU64::new(0),
        };
        (store, rx)
    }

    /// Pre-register a point.
    ///
    /// Returns `false` if the ID already exists. A definition with an initial
    /// value counts as a first report and emits a change event.
    pub fn register(&self, definition: PointDefinition) -> bool {
        let PointDefinition {
            id,
            value_type,
            writable,
            driver,
            device,
            initial,
        } = definition;

        let initial = match initial.map(|v| v.coerce(value_type)).transpose() {
            Ok(v) => v,
            Err(e) => {
                warn!(point = %id, error = %e, "Ignoring initial value");
                None
            }
        };

        match self.points.entry(id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let point = Point {
                    id: id.clone(),
                    value: initial.clone().unwrap_or_else(|| zero_value(value_type)),
                    value_type,
                    timestamp: if initial.is_some() { now_millis() } else { 0 },
                    writable,
                    driver,
                    device,
                    version: u64::from(initial.is_some()),
                };
                if point.has_value() {
                    self.emit(&point);
                }
                let _entry = slot.insert(point);
                self.ids_write().insert(id.clone());
                debug!(point = %id, %value_type, writable, "Registered point");
                true
            }
        }
    }

    /// Write a value without driver attribution.
    ///
    /// Returns whether the value differs from the previous one. Writes with a
    /// timestamp older than the stored one are ignored; equal timestamps are
    /// applied in arrival order. A timestamp of 0 means "now".
    pub fn upsert(&self, id: &str, value: PointValue, timestamp: u64) -> bool {
        self.apply(id, value, timestamp, None, None)
    }

    /// Apply a value reported by `driver`, creating the point if needed.
    pub fn report(&self, driver: &str, report: ValueReport) -> bool {
        let ValueReport {
            id,
            value,
            timestamp,
            device,
        } = report;
        self.apply(&id, value, timestamp, Some(driver), device)
    }

    fn apply(
        &self,
        id: &str,
        value: PointValue,
        timestamp: u64,
        driver: Option<&str>,
        device: Option<String>,
    ) -> bool {
        let timestamp = if timestamp == 0 {
            now_millis()
        } else {
            timestamp
        };

        let changed = match self.points.entry(id.to_string()) {
            Entry::Occupied(mut slot) => {
                let point = slot.get_mut();
                if timestamp < point.timestamp {
                    trace!(point = %id, timestamp, current = point.timestamp, "Stale write ignored");
                    return false;
                }
                let value = match value.coerce(point.value_type) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(point = %id, error = %e, "Rejected value");
                        return false;
                    }
                };

                if let Some(driver) = driver {
                    if point.driver != driver {
                        point.driver = driver.to_string();
                    }
                }
                if device.is_some() {
                    point.device = device;
                }
                point.timestamp = timestamp;

                if point.has_value() && point.value == value {
                    false
                } else {
                    point.value = value;
                    point.version += 1;
                    self.emit(point);
                    true
                }
            }
            Entry::Vacant(slot) => {
                let point = Point {
                    id: id.to_string(),
                    value_type: value.value_type(),
                    value,
                    timestamp,
                    writable: false,
                    driver: driver.unwrap_or_default().to_string(),
                    device,
                    version: 1,
                };
                self.emit(&point);
                let _entry = slot.insert(point);
                self.ids_write().insert(id.to_string());
                debug!(point = %id, "Created point on first report");
                true
            }
        };

        self.writes.fetch_add(1, Ordering::Relaxed);
        self.last_write_ts.fetch_max(timestamp, Ordering::Relaxed);
        changed
    }

    fn emit(&self, point: &Point) {
        // The receiver only disappears during shutdown.
        let _ = self.events.send(ChangeEvent::from(point));
    }

    /// Get a point by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Point> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.points.get(id).map(|p| p.clone())
    }

    /// Resolve each ID independently, preserving request order.
    #[must_use]
    pub fn get_batch<S: AsRef<str>>(&self, ids: &[S]) -> Vec<(String, Option<Point>)> {
        ids.iter()
            .map(|id| {
                let id = id.as_ref();
                (id.to_string(), self.get(id))
            })
            .collect()
    }

    /// All points whose ID starts with `prefix`, ordered by ID.
    ///
    /// The empty prefix returns every point.
    #[must_use]
    pub fn query_by_prefix(&self, prefix: &str) -> Vec<Point> {
        let ids: Vec<String> = {
            let index = self.ids_read();
            index
                .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
                .take_while(|id| id.starts_with(prefix))
                .cloned()
                .collect()
        };

        let points: Vec<Point> = ids
            .iter()
            .filter_map(|id| self.points.get(id).map(|p| p.clone()))
            .collect();
        self.reads.fetch_add(points.len() as u64, Ordering::Relaxed);
        points
    }

    /// Remove a point.
    pub fn remove(&self, id: &str) -> Option<Point> {
        self.remove_if(id, |_| true)
    }

    /// Remove every point owned by `driver`. Returns how many were removed.
    ///
    /// Ownership is checked again under each point's lock, so a point taken
    /// over by another driver in the meantime is kept.
    pub fn remove_driver_points(&self, driver: &str) -> usize {
        let owned: Vec<String> = self
            .points
            .iter()
            .filter(|p| p.driver == driver)
            .map(|p| p.key().clone())
            .collect();

        owned
            .iter()
            .filter(|id| self.remove_if(id, |p| p.driver == driver).is_some())
            .count()
    }

    // Lock order is entry then index, as in `apply` and `register`.
    fn remove_if(&self, id: &str, predicate: impl FnOnce(&Point) -> bool) -> Option<Point> {
        match self.points.entry(id.to_string()) {
            Entry::Occupied(slot) if predicate(slot.get()) => {
                let mut ids = self.ids_write();
                let point = slot.remove();
                ids.remove(id);
                debug!(point = %id, "Removed point");
                Some(point)
            }
            _ => None,
        }
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get store statistics.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            total_points: self.points.len(),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            last_write_ts: self.last_write_ts.load(Ordering::Relaxed),
        }
    }

    fn ids_read(&self) -> RwLockReadGuard<'_, BTreeSet<String>> {
        self.ids.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn ids_write(&self) -> RwLockWriteGuard<'_, BTreeSet<String>> {
        self.ids.write().unwrap_or_else(PoisonError::into_inner)
    }
}
