//! The assembled hub.
//!
//! Wires the store, subscription registry, driver registry, control
//! dispatcher and fan-out pump together. Transports hold an `Arc<Hub>` and
//! talk to nothing else.

use crate::control::{ControlAck, ControlDispatcher, ControlError, DEFAULT_CONTROL_TIMEOUT};
use crate::driver::{Driver, DriverError, DriverRegistry};
use crate::fanout::{FanoutPump, FanoutStats};
use crate::point::PointDefinition;
use crate::registry::{RegistryConfig, SubscriptionRegistry};
use crate::store::{PointStore, StoreConfig};
use pointhub_protocol::api::{ReportResponse, ValueReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Point store settings.
    pub store: StoreConfig,
    /// Subscription registry settings.
    pub registry: RegistryConfig,
    /// How long control commands wait for a driver.
    pub control_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            registry: RegistryConfig::default(),
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
        }
    }
}

/// Point store, subscriptions and control behind one handle.
pub struct Hub {
    store: Arc<PointStore>,
    registry: Arc<SubscriptionRegistry>,
    drivers: Arc<DriverRegistry>,
    control: ControlDispatcher,
    fanout: Arc<FanoutStats>,
    pump: JoinHandle<()>,
}

impl Hub {
    /// Build the hub and start its fan-out task.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(config: HubConfig) -> Self {
        let (store, events) = PointStore::with_config(config.store);
        let store = Arc::new(store);
        let registry = Arc::new(SubscriptionRegistry::with_config(config.registry));
        let drivers = Arc::new(DriverRegistry::new());
        let control = ControlDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&drivers),
            config.control_timeout,
        );

        let pump = FanoutPump::new(Arc::clone(&registry));
        let fanout = pump.stats();
        let pump = pump.spawn(events);

        info!(control_timeout = ?config.control_timeout, "Hub started");
        Self {
            store,
            registry,
            drivers,
            control,
            fanout,
            pump,
        }
    }

    /// The point store.
    #[must_use]
    pub fn store(&self) -> &Arc<PointStore> {
        &self.store
    }

    /// The subscription registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// The driver registry.
    #[must_use]
    pub fn drivers(&self) -> &Arc<DriverRegistry> {
        &self.drivers
    }

    /// Fan-out counters.
    #[must_use]
    pub fn fanout_stats(&self) -> &FanoutStats {
        &self.fanout
    }

    /// Pre-register a point. Returns `false` if it already exists.
    pub fn register_point(&self, definition: PointDefinition) -> bool {
        self.store.register(definition)
    }

    /// Register a driver.
    ///
    /// # Errors
    ///
    /// Returns an error if a driver with the same name exists.
    pub fn register_driver(&self, driver: Arc<dyn Driver>) -> Result<(), DriverError> {
        self.drivers.register(driver)
    }

    /// Remove a driver together with the points it owns.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver is not registered.
    pub fn deregister_driver(&self, name: &str) -> Result<usize, DriverError> {
        self.drivers.deregister(name, &self.store)
    }

    /// Apply a batch of value reports from `driver`.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver is not registered; nothing is applied
    /// in that case.
    pub fn report(
        &self,
        driver: &str,
        reports: Vec<ValueReport>,
    ) -> Result<ReportResponse, DriverError> {
        if !self.drivers.contains(driver) {
            return Err(DriverError::NotRegistered(driver.to_string()));
        }

        let accepted = reports.len();
        let changed = reports
            .into_iter()
            .map(|report| self.store.report(driver, report))
            .filter(|changed| *changed)
            .count();

        debug!(driver = %driver, accepted, changed, "Applied reports");
        Ok(ReportResponse { accepted, changed })
    }

    /// Dispatch a control command.
    ///
    /// # Errors
    ///
    /// See [`ControlDispatcher::dispatch`].
    pub async fn control(&self, point_id: &str, raw_value: &str) -> Result<ControlAck, ControlError> {
        self.control.dispatch(point_id, raw_value).await
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
