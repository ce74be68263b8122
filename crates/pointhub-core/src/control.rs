//! Control command dispatch.
//!
//! A control request names a point and carries its new value as text. The
//! dispatcher validates it against the store, forwards it to the owning
//! driver under a timeout, and on acknowledgement writes the value through
//! [`PointStore::upsert`] so subscribers see it like any other update.
//!
//! Nothing is written to the store unless the driver acknowledged the write.

use crate::driver::DriverRegistry;
use crate::point::now_millis;
use crate::store::PointStore;
use pointhub_protocol::{PointValue, ValueError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default time to wait for a driver acknowledgement.
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Control errors.
#[derive(Debug, Error)]
pub enum ControlError {
    /// No point with this ID.
    #[error("Point not found: {0}")]
    NotFound(String),

    /// The point does not accept control commands.
    #[error("Point is not writable: {0}")]
    NotWritable(String),

    /// The value does not convert to the point's declared type.
    #[error("Invalid value: {0}")]
    InvalidValue(#[from] ValueError),

    /// The driver did not answer in time.
    #[error("Driver {driver} did not acknowledge within {timeout_ms}ms")]
    Timeout {
        /// Owning driver.
        driver: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The driver is missing or refused the write.
    #[error("Dispatch to driver {driver:?} failed: {reason}")]
    DispatchFailed {
        /// Owning driver.
        driver: String,
        /// What went wrong.
        reason: String,
    },
}

impl ControlError {
    /// Stable error code reported to clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::NotFound(_) => "NOT_FOUND",
            ControlError::NotWritable(_) => "NOT_WRITABLE",
            ControlError::InvalidValue(_) => "INVALID_VALUE",
            ControlError::Timeout { .. } | ControlError::DispatchFailed { .. } => {
                "DISPATCH_FAILED"
            }
        }
    }
}

/// Successful control outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlAck {
    /// Point written.
    pub point_id: String,
    /// Value as stored, in the point's declared type.
    pub value: PointValue,
    /// Timestamp the value was stored with.
    pub timestamp: u64,
    /// Whether the value differed from the previous one.
    pub changed: bool,
}

/// Validates control requests and routes them to drivers.
pub struct ControlDispatcher {
    store: Arc<PointStore>,
    drivers: Arc<DriverRegistry>,
    timeout: Duration,
}

impl ControlDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(store: Arc<PointStore>, drivers: Arc<DriverRegistry>, timeout: Duration) -> Self {
        Self {
            store,
            drivers,
            timeout,
        }
    }

    /// Dispatch a control command.
    ///
    /// # Errors
    ///
    /// Checks run in order: the point must exist and be writable, the value
    /// must convert to its declared type, and the owning driver must
    /// acknowledge the write within the timeout.
    pub async fn dispatch(&self, point_id: &str, raw_value: &str) -> Result<ControlAck, ControlError> {
        let point = self
            .store
            .get(point_id)
            .ok_or_else(|| ControlError::NotFound(point_id.to_string()))?;
        if !point.writable {
            return Err(ControlError::NotWritable(point_id.to_string()));
        }

        let value = PointValue::parse(raw_value, point.value_type)?;

        let driver = self
            .drivers
            .get(&point.driver)
            .ok_or_else(|| ControlError::DispatchFailed {
                driver: point.driver.clone(),
                reason: "driver not registered".to_string(),
            })?;

        debug!(point = %point_id, driver = %point.driver, value = %value, "Dispatching control");
        match tokio::time::timeout(self.timeout, driver.write_point(point_id, &value)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(point = %point_id, driver = %point.driver, error = %e, "Control rejected");
                return Err(ControlError::DispatchFailed {
                    driver: point.driver,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(point = %point_id, driver = %point.driver, "Control timed out");
                return Err(ControlError::Timeout {
                    driver: point.driver,
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }

        // Never older than the stored value, or the upsert would be dropped.
        let timestamp = now_millis().max(point.timestamp);
        let changed = self.store.upsert(point_id, value.clone(), timestamp);

        Ok(ControlAck {
            point_id: point_id.to_string(),
            value,
            timestamp,
            changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::LoopbackDriver;
    use crate::point::PointDefinition;
    use pointhub_protocol::ValueType;

    struct Fixture {
        dispatcher: ControlDispatcher,
        store: Arc<PointStore>,
        driver: Arc<LoopbackDriver>,
        events: tokio::sync::mpsc::UnboundedReceiver<crate::point::ChangeEvent>,
    }

    fn fixture(delay: Duration) -> Fixture {
        let (store, events) = PointStore::new();
        let store = Arc::new(store);
        let drivers = Arc::new(DriverRegistry::new());
        let driver = Arc::new(LoopbackDriver::new("sim").with_write_delay(delay));
        drivers.register(driver.clone()).unwrap();

        store.register(
            PointDefinition::new("a.b", ValueType::Int)
                .writable()
                .owned_by("sim")
                .with_initial(1i64),
        );
        store.register(
            PointDefinition::new("a.ro", ValueType::Int)
                .owned_by("sim")
                .with_initial(1i64),
        );
        store.register(
            PointDefinition::new("a.orphan", ValueType::Int)
                .writable()
                .owned_by("gone"),
        );

        let mut fixture = Fixture {
            dispatcher: ControlDispatcher::new(Arc::clone(&store), drivers, Duration::from_secs(1)),
            store,
            driver,
            events,
        };
        while fixture.events.try_recv().is_ok() {}
        fixture
    }

    #[tokio::test]
    async fn test_dispatch_success_updates_store() {
        let mut f = fixture(Duration::ZERO);

        let ack = f.dispatcher.dispatch("a.b", "2").await.unwrap();
        assert_eq!(ack.value, PointValue::Int(2));
        assert!(ack.changed);

        assert_eq!(f.store.get("a.b").unwrap().value, PointValue::Int(2));
        assert_eq!(f.driver.writes(), vec![("a.b".to_string(), PointValue::Int(2))]);
        assert_eq!(f.events.try_recv().unwrap().value, PointValue::Int(2));
    }

    #[tokio::test]
    async fn test_validation_order() {
        let mut f = fixture(Duration::ZERO);

        assert!(matches!(
            f.dispatcher.dispatch("a.missing", "2").await,
            Err(ControlError::NotFound(_))
        ));
        assert!(matches!(
            f.dispatcher.dispatch("a.ro", "not a number").await,
            Err(ControlError::NotWritable(_))
        ));
        assert!(matches!(
            f.dispatcher.dispatch("a.b", "two").await,
            Err(ControlError::InvalidValue(_))
        ));
        assert!(matches!(
            f.dispatcher.dispatch("a.orphan", "2").await,
            Err(ControlError::DispatchFailed { .. })
        ));

        assert!(f.events.try_recv().is_err());
        assert_eq!(f.store.get("a.b").unwrap().value, PointValue::Int(1));
        assert!(f.driver.writes().is_empty());
    }

    #[tokio::test]
    async fn test_driver_rejection_leaves_store_untouched() {
        let mut f = fixture(Duration::ZERO);
        f.driver.set_reject(true);

        let err = f.dispatcher.dispatch("a.b", "5").await.unwrap_err();
        assert_eq!(err.code(), "DISPATCH_FAILED");
        assert_eq!(f.store.get("a.b").unwrap().value, PointValue::Int(1));
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_timeout() {
        let mut f = fixture(Duration::from_secs(30));

        let err = f.dispatcher.dispatch("a.b", "5").await.unwrap_err();
        assert!(matches!(err, ControlError::Timeout { timeout_ms: 1000, .. }));
        assert_eq!(f.store.get("a.b").unwrap().value, PointValue::Int(1));
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_same_value_acknowledged_without_change() {
        let mut f = fixture(Duration::ZERO);

        let ack = f.dispatcher.dispatch("a.b", "1").await.unwrap();
        assert!(!ack.changed);
        assert!(f.events.try_recv().is_err());
    }
}
