//! Device discovery and ownership
//!
//! The [`DeviceRegistry`] wraps a [`DeviceBackend`] with a discovery timeout
//! and a claim table that enforces one active session per physical device.

use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::backend::DeviceBackend;
use crate::config::SessionConfig;
use crate::session::DeviceSession;
use crate::types::Device;
use crate::{DeviceError, Result};

/// Enumerates devices and hands out sessions.
///
/// Cloning is cheap; clones share the backend and the claim table.
#[derive(Clone)]
pub struct DeviceRegistry {
    backend: Arc<dyn DeviceBackend>,
    claims: ClaimTable,
    config: Arc<SessionConfig>,
}

impl DeviceRegistry {
    /// Create a registry with the default configuration.
    pub fn new<B: DeviceBackend>(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            claims: ClaimTable::default(),
            config: Arc::new(SessionConfig::default()),
        }
    }

    /// Create a registry with a validated configuration.
    pub fn with_config<B: DeviceBackend>(backend: B, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend: Arc::new(backend),
            claims: ClaimTable::default(),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Enumerate attached devices once.
    ///
    /// Bounded by the configured discovery timeout. Devices reported twice
    /// under the same serial are collapsed to the first report.
    pub async fn enumerate(&self) -> Result<Vec<Device>> {
        let timeout = self.config.discovery_timeout();
        let devices = match tokio::time::timeout(timeout, self.backend.enumerate()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Device enumeration timed out after {:?}", timeout);
                return Err(DeviceError::discovery(format!(
                    "enumeration did not complete within {:?}",
                    timeout
                )));
            }
        };

        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(devices.len());
        for device in devices {
            if seen.insert(device.serial_number.clone()) {
                unique.push(device);
            } else {
                warn!(serial = %device.serial_number, "Backend reported duplicate device");
            }
        }

        debug!("Enumerated {} device(s)", unique.len());
        Ok(unique)
    }

    /// Lazily enumerate attached devices.
    ///
    /// Nothing happens until the stream is first polled. Each call returns a
    /// fresh stream that enumerates again. A discovery failure is yielded as
    /// the stream's only item.
    pub fn list_devices(&self) -> impl Stream<Item = Result<Device>> + Send + 'static {
        let registry = self.clone();
        futures::stream::once(async move { registry.enumerate().await }).flat_map(|result| {
            let items: Vec<Result<Device>> = match result {
                Ok(devices) => devices.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            futures::stream::iter(items)
        })
    }

    /// Look up a currently attached device.
    ///
    /// `Ok(None)` when no attached device has this serial.
    pub async fn find_by_serial(&self, serial: &str) -> Result<Option<Device>> {
        let devices = self.enumerate().await?;
        Ok(devices.into_iter().find(|device| device.serial_number == serial))
    }

    /// Create a disconnected session for a device.
    pub fn session(&self, device: Device) -> DeviceSession {
        info!(device = %device, "Creating session");
        DeviceSession::new(
            device,
            Arc::clone(&self.backend),
            self.claims.clone(),
            Arc::clone(&self.config),
        )
    }

    /// Whether some session currently owns the device.
    pub fn is_claimed(&self, serial: &str) -> bool {
        self.claims.contains(serial)
    }
}

/// Serials owned by an active session.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClaimTable {
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl ClaimTable {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take ownership of a device, or fail with `DeviceBusy`.
    pub fn claim(&self, device: &Device) -> Result<DeviceClaim> {
        let serial = device.serial_number.clone();
        if !self.lock().insert(serial.clone()) {
            return Err(DeviceError::DeviceBusy { serial });
        }
        debug!(serial = %serial, "Device claimed");
        Ok(DeviceClaim { table: self.clone(), serial })
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.lock().contains(serial)
    }
}

/// Ownership of one device; released on drop.
#[derive(Debug)]
pub(crate) struct DeviceClaim {
    table: ClaimTable,
    serial: String,
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        self.table.lock().remove(&self.serial);
        debug!(serial = %self.serial, "Device claim released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockBackend;
    use std::time::Duration;

    #[tokio::test]
    async fn lists_the_attached_device() {
        let registry = DeviceRegistry::new(MockBackend::with_serials(&["1234567890"]));

        let devices: Vec<_> = registry.list_devices().collect().await;
        assert_eq!(devices.len(), 1);
        let device = devices.into_iter().next().unwrap().unwrap();
        assert_eq!(device.serial_number, "1234567890");
    }

    #[tokio::test]
    async fn list_devices_is_lazy_and_restartable() {
        let backend = MockBackend::with_serials(&["a"]);
        let registry = DeviceRegistry::new(backend.clone());

        let stream = registry.list_devices();
        assert_eq!(backend.enumerations(), 0);

        let first: Vec<_> = stream.collect().await;
        backend.set_serials(&["a", "b"]);
        let second: Vec<_> = registry.list_devices().collect().await;

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert_eq!(backend.enumerations(), 2);
    }

    #[tokio::test]
    async fn unavailable_backend_is_a_discovery_error() {
        let backend = MockBackend::with_serials(&["a"]);
        backend.set_enumeration_available(false);
        let registry = DeviceRegistry::new(backend);

        let items: Vec<_> = registry.list_devices().collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(DeviceError::Discovery { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_enumeration_is_bounded() {
        let backend = MockBackend::with_serials(&["a"]);
        backend.set_enumeration_delay(Duration::from_secs(60));
        let config = SessionConfig { discovery_timeout_ms: 100, ..SessionConfig::default() };
        let registry = DeviceRegistry::with_config(backend, config).unwrap();

        let err = registry.enumerate().await.unwrap_err();
        assert!(matches!(err, DeviceError::Discovery { .. }));
    }

    #[tokio::test]
    async fn find_by_serial_returns_none_when_absent() {
        let registry = DeviceRegistry::new(MockBackend::with_serials(&["1234567890"]));

        assert!(registry.find_by_serial("1234567890").await.unwrap().is_some());
        assert!(registry.find_by_serial("0000000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_serials_are_collapsed() {
        let registry = DeviceRegistry::new(MockBackend::with_serials(&["a", "a", "b"]));
        let devices = registry.enumerate().await.unwrap();
        assert_eq!(devices.len(), 2);
    }

    #[test]
    fn claims_are_exclusive_and_released_on_drop() {
        let table = ClaimTable::default();
        let device = Device::kinect_v2("1234567890");

        let claim = table.claim(&device).unwrap();
        assert!(matches!(table.claim(&device), Err(DeviceError::DeviceBusy { .. })));
        assert!(table.contains("1234567890"));

        drop(claim);
        assert!(!table.contains("1234567890"));
        assert!(table.claim(&device).is_ok());
    }

    #[test]
    fn invalid_config_is_refused() {
        let config = SessionConfig { connect_timeout_ms: 0, ..SessionConfig::default() };
        assert!(DeviceRegistry::with_config(MockBackend::with_serials(&[]), config).is_err());
    }
}
