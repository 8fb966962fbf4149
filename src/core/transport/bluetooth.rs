//! Bluetooth Low Energy transport
//!
//! Implements the GATT traits on top of btleplug. Discovery scans for a
//! peripheral whose advertised name starts with the requested prefix.
//! Notifications from the peripheral arrive on one stream and are fanned out
//! to subscribers by characteristic UUID. Link loss is detected from adapter
//! events.

use super::{
    Characteristic, DisconnectHandler, GattService, GattSession, NotificationHandler, Transport,
    TransportError, TransportHandle, WriteMode,
};
use async_trait::async_trait;
use btleplug::api::{self as ble, Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use uuid::Uuid;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Bluetooth connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluetoothConfig {
    /// How long to scan before giving up
    pub scan_timeout_secs: u64,
    /// GATT connect timeout
    pub connection_timeout_secs: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 5,
            connection_timeout_secs: 10,
        }
    }
}

/// Map a btleplug error, recognising the "operation in progress" condition
fn classify(error: btleplug::Error, wrap: fn(String) -> TransportError) -> TransportError {
    let message = error.to_string();
    if message.to_lowercase().contains("in progress") {
        TransportError::Busy
    } else {
        wrap(message)
    }
}

/// BLE transport on the first system adapter
pub struct BluetoothTransport {
    config: BluetoothConfig,
}

impl BluetoothTransport {
    /// Create a new Bluetooth transport
    pub fn new(config: BluetoothConfig) -> Self {
        Self { config }
    }

    async fn adapter() -> Result<Adapter, TransportError> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to create manager: {}", e)))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to get adapters: {}", e)))?;

        adapters
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::ConnectionFailed("No Bluetooth adapter found".to_string()))
    }

    async fn find_peripheral(
        adapter: &Adapter,
        name_prefix: &str,
    ) -> Result<Option<(Peripheral, String)>, TransportError> {
        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to get peripherals: {}", e)))?;

        for peripheral in peripherals {
            if let Ok(Some(props)) = peripheral.properties().await {
                if let Some(name) = props.local_name {
                    if name.starts_with(name_prefix) {
                        return Ok(Some((peripheral, name)));
                    }
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Transport for BluetoothTransport {
    async fn discover(
        &self,
        name_prefix: &str,
        services: &[Uuid],
    ) -> Result<Arc<dyn TransportHandle>, TransportError> {
        let adapter = Self::adapter().await?;

        // FlowIO does not advertise every service it hosts, so filter on name only
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to start scan: {}", e)))?;

        tracing::info!(name_prefix, services = services.len(), "scanning for device");
        let deadline = Instant::now() + Duration::from_secs(self.config.scan_timeout_secs);
        let found = loop {
            if let Some(found) = Self::find_peripheral(&adapter, name_prefix).await? {
                break Some(found);
            }
            if Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        };

        if let Err(e) = adapter.stop_scan().await {
            tracing::warn!(error = %e, "failed to stop scan");
        }

        let (peripheral, name) =
            found.ok_or_else(|| TransportError::DeviceNotFound(name_prefix.to_string()))?;
        tracing::info!(%name, id = %peripheral.id(), "device found");

        Ok(Arc::new(BluetoothHandle::new(
            adapter,
            peripheral,
            name,
            self.config.connection_timeout_secs,
        )))
    }
}

/// State shared between a handle, its sessions and its background tasks
#[derive(Default)]
struct Link {
    connected: AtomicBool,
    subscribers: RwLock<HashMap<Uuid, Vec<NotificationHandler>>>,
    disconnect_handlers: RwLock<Vec<DisconnectHandler>>,
}

impl Link {
    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn dispatch(&self, characteristic: Uuid, data: &[u8]) {
        let handlers = self
            .subscribers
            .read()
            .get(&characteristic)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(data);
        }
    }

    fn lost(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let handlers = self.disconnect_handlers.read().clone();
            for handler in handlers {
                handler();
            }
        }
    }
}

/// A discovered FlowIO peripheral
pub struct BluetoothHandle {
    adapter: Adapter,
    peripheral: Peripheral,
    name: String,
    connection_timeout_secs: u64,
    link: Arc<Link>,
    notification_task: Mutex<Option<JoinHandle<()>>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl BluetoothHandle {
    fn new(adapter: Adapter, peripheral: Peripheral, name: String, connection_timeout_secs: u64) -> Self {
        Self {
            adapter,
            peripheral,
            name,
            connection_timeout_secs,
            link: Arc::new(Link::default()),
            notification_task: Mutex::new(None),
            event_task: Mutex::new(None),
        }
    }

    async fn start_notifications(&self) -> Result<(), TransportError> {
        let mut stream = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::SubscribeError(e.to_string()))?;

        let link = self.link.clone();
        let task = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                link.dispatch(notification.uuid, &notification.value);
            }
            tracing::debug!("notification stream ended");
        });

        if let Some(old) = self.notification_task.lock().replace(task) {
            old.abort();
        }
        Ok(())
    }

    async fn watch_link(&self) -> Result<(), TransportError> {
        if self.event_task.lock().is_some() {
            return Ok(());
        }

        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to get adapter events: {}", e)))?;

        let id = self.peripheral.id();
        let link = self.link.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(lost) = event {
                    if lost == id {
                        tracing::warn!("link lost");
                        link.lost();
                    }
                }
            }
        });

        *self.event_task.lock() = Some(task);
        Ok(())
    }

    /// Everything after the radio link is up: services, notification pump, link watch
    async fn prepare_link(&self) -> Result<(), TransportError> {
        self.peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to discover services: {}", e)))?;

        self.link.subscribers.write().clear();
        self.start_notifications().await?;
        self.watch_link().await
    }

    /// Tear down a half-open link
    async fn abandon_link(&self) {
        if let Some(task) = self.notification_task.lock().take() {
            task.abort();
        }
        self.link.subscribers.write().clear();
        match self.peripheral.disconnect().await {
            Ok(()) => tracing::debug!(name = %self.name, "half-open link closed"),
            Err(e) => tracing::warn!(name = %self.name, error = %e, "failed to close half-open link"),
        }
    }
}

impl Drop for BluetoothHandle {
    fn drop(&mut self) {
        for task in [self.notification_task.lock().take(), self.event_task.lock().take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

#[async_trait]
impl TransportHandle for BluetoothHandle {
    fn id(&self) -> String {
        self.peripheral.id().to_string()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    async fn open_session(&self) -> Result<Arc<dyn GattSession>, TransportError> {
        let timeout = Duration::from_secs(self.connection_timeout_secs);
        tokio::time::timeout(timeout, self.peripheral.connect())
            .await
            .map_err(|_| TransportError::Timeout(self.connection_timeout_secs))?
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to connect: {}", e)))?;

        if let Err(e) = self.prepare_link().await {
            tracing::warn!(name = %self.name, error = %e, "GATT setup failed, closing link");
            self.abandon_link().await;
            return Err(e);
        }
        self.link.connected.store(true, Ordering::SeqCst);
        tracing::info!(name = %self.name, "GATT session established");

        Ok(Arc::new(BluetoothSession {
            peripheral: self.peripheral.clone(),
            link: self.link.clone(),
        }))
    }

    fn on_disconnect(&self, handler: DisconnectHandler) {
        self.link.disconnect_handlers.write().push(handler);
    }
}

struct BluetoothSession {
    peripheral: Peripheral,
    link: Arc<Link>,
}

#[async_trait]
impl GattSession for BluetoothSession {
    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    async fn primary_service(&self, uuid: Uuid) -> Result<Arc<dyn GattService>, TransportError> {
        self.link.ensure_connected()?;
        let service = self
            .peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == uuid && s.primary)
            .ok_or(TransportError::ServiceNotFound(uuid))?;

        Ok(Arc::new(BluetoothService {
            peripheral: self.peripheral.clone(),
            link: self.link.clone(),
            service,
        }))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        // Cleared first so the adapter event does not report a link loss
        self.link.connected.store(false, Ordering::SeqCst);
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to disconnect: {}", e)))
    }
}

struct BluetoothService {
    peripheral: Peripheral,
    link: Arc<Link>,
    service: ble::Service,
}

#[async_trait]
impl GattService for BluetoothService {
    fn uuid(&self) -> Uuid {
        self.service.uuid
    }

    async fn characteristic(&self, uuid: Uuid) -> Result<Arc<dyn Characteristic>, TransportError> {
        let inner = self
            .service
            .characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or(TransportError::CharacteristicNotFound(uuid))?;

        Ok(Arc::new(BluetoothCharacteristic {
            peripheral: self.peripheral.clone(),
            link: self.link.clone(),
            inner,
        }))
    }
}

struct BluetoothCharacteristic {
    peripheral: Peripheral,
    link: Arc<Link>,
    inner: ble::Characteristic,
}

#[async_trait]
impl Characteristic for BluetoothCharacteristic {
    fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    async fn read(&self) -> Result<Vec<u8>, TransportError> {
        self.link.ensure_connected()?;
        self.peripheral
            .read(&self.inner)
            .await
            .map_err(|e| classify(e, TransportError::ReadError))
    }

    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        self.link.ensure_connected()?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        tracing::trace!(uuid = %self.inner.uuid, data = %hex::encode(data), %mode, "gatt write");
        self.peripheral
            .write(&self.inner, data, write_type)
            .await
            .map_err(|e| classify(e, TransportError::WriteError))
    }

    async fn subscribe(&self, handler: NotificationHandler) -> Result<(), TransportError> {
        self.link.ensure_connected()?;
        self.link
            .subscribers
            .write()
            .entry(self.inner.uuid)
            .or_default()
            .push(handler);
        self.peripheral
            .subscribe(&self.inner)
            .await
            .map_err(|e| classify(e, TransportError::SubscribeError))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_bluetooth_config_default() {
        let config = BluetoothConfig::default();
        assert_eq!(config.scan_timeout_secs, 5);
        assert_eq!(config.connection_timeout_secs, 10);
    }

    #[test]
    fn test_busy_classification() {
        let busy = btleplug::Error::Other("Operation already in progress".into());
        assert_eq!(classify(busy, TransportError::WriteError), TransportError::Busy);

        let other = btleplug::Error::NotConnected;
        assert!(matches!(
            classify(other, TransportError::WriteError),
            TransportError::WriteError(_)
        ));
    }

    #[test]
    fn test_link_dispatch_and_loss() {
        let link = Link::default();
        let received = Arc::new(AtomicUsize::new(0));
        let lost = Arc::new(AtomicUsize::new(0));

        let counter = received.clone();
        let chr = Uuid::from_u128(0xc2);
        link.subscribers.write().entry(chr).or_default().push(Arc::new(move |data: &[u8]| {
            counter.fetch_add(data.len(), Ordering::SeqCst);
        }));
        let counter = lost.clone();
        link.disconnect_handlers.write().push(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        link.dispatch(chr, &[1, 2, 3]);
        link.dispatch(Uuid::from_u128(0xc1), &[1]);
        assert_eq!(received.load(Ordering::SeqCst), 3);

        // Loss only reported for a live link, and only once
        link.lost();
        link.connected.store(true, Ordering::SeqCst);
        link.lost();
        link.lost();
        assert_eq!(lost.load(Ordering::SeqCst), 1);
        assert!(link.ensure_connected().is_err());
    }
}
