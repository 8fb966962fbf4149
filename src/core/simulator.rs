//! Simulated FlowIO peripheral
//!
//! An in-memory GATT device exposing the FlowIO service layout. Used by the
//! test suite and by the CLI's `--simulate` flag to exercise the driver
//! without a radio. Failures can be injected per characteristic, per
//! service, or per connection attempt.

use crate::core::capability::{characteristic_uuids, service_uuids};
use crate::core::codec::PidSettings;
use crate::core::transport::{
    Characteristic, DisconnectHandler, GattService, GattSession, NotificationHandler, Transport,
    TransportError, TransportHandle, WriteMode,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Recorded characteristic write
pub type WriteRecord = (Vec<u8>, WriteMode);

/// Default FlowIO GATT layout: service → characteristics
fn default_layout() -> HashMap<Uuid, Vec<Uuid>> {
    HashMap::from([
        (service_uuids::POWER_OFF, vec![characteristic_uuids::POWER_OFF_TIMER]),
        (service_uuids::CONFIG, vec![characteristic_uuids::CONFIG_MODE]),
        (
            service_uuids::CONTROL,
            vec![characteristic_uuids::CONTROL_COMMAND, characteristic_uuids::HARDWARE_STATUS],
        ),
        (service_uuids::ANALOG, vec![characteristic_uuids::ANALOG_VALUES]),
        (
            service_uuids::PID,
            vec![characteristic_uuids::PID_SETTINGS, characteristic_uuids::PID_GOALS],
        ),
        (service_uuids::BATTERY, vec![characteristic_uuids::BATTERY_LEVEL]),
    ])
}

/// Power-on characteristic values
fn default_values() -> HashMap<Uuid, Vec<u8>> {
    HashMap::from([
        (characteristic_uuids::POWER_OFF_TIMER, vec![0xff]),
        (characteristic_uuids::CONFIG_MODE, vec![0x00]),
        (characteristic_uuids::HARDWARE_STATUS, vec![0x00, 0x00]),
        (characteristic_uuids::ANALOG_VALUES, Vec::new()),
        (characteristic_uuids::CONTROL_COMMAND, Vec::new()),
        (characteristic_uuids::PID_SETTINGS, PidSettings::default().encode()),
        (characteristic_uuids::PID_GOALS, vec![0; 10]),
        (characteristic_uuids::BATTERY_LEVEL, vec![100]),
    ])
}

#[derive(Default)]
struct DeviceState {
    services: HashMap<Uuid, Vec<Uuid>>,
    values: HashMap<Uuid, Vec<u8>>,
    writes: HashMap<Uuid, Vec<WriteRecord>>,
    read_failures: HashMap<Uuid, TransportError>,
    write_failures: HashMap<Uuid, TransportError>,
    subscribers: HashMap<Uuid, Vec<NotificationHandler>>,
    disconnect_handlers: Vec<DisconnectHandler>,
    failing_opens: u32,
    failing_setups: u32,
    links_closed: u32,
    sessions_opened: u32,
    /// Generation of the live session, `None` while the link is down
    link: Option<u32>,
}

/// Simulated FlowIO peripheral. Clones share the same device.
#[derive(Clone)]
pub struct SimulatedDevice {
    id: String,
    name: String,
    state: Arc<RwLock<DeviceState>>,
}

impl SimulatedDevice {
    /// Create a device advertising `name`, with every FlowIO service present
    pub fn new(name: &str) -> Self {
        let state = DeviceState {
            services: default_layout(),
            values: default_values(),
            ..Default::default()
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Whether a session is currently open
    pub fn is_connected(&self) -> bool {
        self.state.read().link.is_some()
    }

    /// Number of sessions opened so far
    pub fn sessions_opened(&self) -> u32 {
        self.state.read().sessions_opened
    }

    /// Stop exposing a service
    pub fn remove_service(&self, service: Uuid) {
        self.state.write().services.remove(&service);
    }

    /// Re-expose a removed FlowIO service
    pub fn restore_service(&self, service: Uuid) {
        if let Some(characteristics) = default_layout().remove(&service) {
            self.state.write().services.insert(service, characteristics);
        }
    }

    /// Current value of a characteristic
    pub fn value(&self, characteristic: Uuid) -> Option<Vec<u8>> {
        self.state.read().values.get(&characteristic).cloned()
    }

    /// Overwrite a characteristic value without notifying
    pub fn set_value(&self, characteristic: Uuid, data: &[u8]) {
        self.state.write().values.insert(characteristic, data.to_vec());
    }

    /// Writes received on a characteristic, oldest first
    pub fn writes(&self, characteristic: Uuid) -> Vec<WriteRecord> {
        self.state
            .read()
            .writes
            .get(&characteristic)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail every subsequent read of a characteristic
    pub fn fail_reads(&self, characteristic: Uuid, error: TransportError) {
        self.state.write().read_failures.insert(characteristic, error);
    }

    /// Fail every subsequent write to a characteristic
    pub fn fail_writes(&self, characteristic: Uuid, error: TransportError) {
        self.state.write().write_failures.insert(characteristic, error);
    }

    /// Clear injected read and write failures
    pub fn clear_failures(&self) {
        let mut state = self.state.write();
        state.read_failures.clear();
        state.write_failures.clear();
    }

    /// Fail the next `count` connection attempts
    pub fn fail_open(&self, count: u32) {
        self.state.write().failing_opens = count;
    }

    /// Let the next `count` connections come up, then fail service
    /// discovery. The half-open link is closed before the error is returned.
    pub fn fail_setup(&self, count: u32) {
        self.state.write().failing_setups = count;
    }

    /// Links closed after a failed setup
    pub fn links_closed(&self) -> u32 {
        self.state.read().links_closed
    }

    /// Push a notification to every subscriber of a characteristic
    pub fn notify(&self, characteristic: Uuid, data: &[u8]) {
        let handlers = self
            .state
            .read()
            .subscribers
            .get(&characteristic)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(data);
        }
    }

    /// Change the hardware status and notify
    pub fn set_hardware_status(&self, status: [u8; 2]) {
        self.set_value(characteristic_uuids::HARDWARE_STATUS, &status);
        self.notify(characteristic_uuids::HARDWARE_STATUS, &status);
    }

    /// Drop the link as if the peripheral went out of range
    pub fn drop_connection(&self) {
        let handlers = {
            let mut state = self.state.write();
            state.link = None;
            state.disconnect_handlers.clone()
        };
        tracing::debug!(device = %self.name, "simulated link lost");
        for handler in handlers {
            handler();
        }
    }
}

#[async_trait]
impl TransportHandle for SimulatedDevice {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    async fn open_session(&self) -> Result<Arc<dyn GattSession>, TransportError> {
        let mut state = self.state.write();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(TransportError::ConnectionFailed(
                "simulated connection failure".to_string(),
            ));
        }
        state.sessions_opened += 1;
        let generation = state.sessions_opened;
        state.link = Some(generation);
        state.subscribers.clear();
        if state.failing_setups > 0 {
            state.failing_setups -= 1;
            state.link = None;
            state.links_closed += 1;
            return Err(TransportError::ConnectionFailed(
                "simulated service discovery failure".to_string(),
            ));
        }
        Ok(Arc::new(SimulatedSession {
            device: self.clone(),
            generation,
        }))
    }

    fn on_disconnect(&self, handler: DisconnectHandler) {
        self.state.write().disconnect_handlers.push(handler);
    }
}

struct SimulatedSession {
    device: SimulatedDevice,
    generation: u32,
}

impl SimulatedSession {
    fn live(state: &DeviceState, generation: u32) -> Result<(), TransportError> {
        if state.link == Some(generation) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl GattSession for SimulatedSession {
    fn is_connected(&self) -> bool {
        self.device.state.read().link == Some(self.generation)
    }

    async fn primary_service(&self, uuid: Uuid) -> Result<Arc<dyn GattService>, TransportError> {
        let state = self.device.state.read();
        Self::live(&state, self.generation)?;
        let characteristics = state
            .services
            .get(&uuid)
            .cloned()
            .ok_or(TransportError::ServiceNotFound(uuid))?;
        Ok(Arc::new(SimulatedService {
            device: self.device.clone(),
            generation: self.generation,
            uuid,
            characteristics,
        }))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.device.state.write();
        if state.link == Some(self.generation) {
            state.link = None;
        }
        Ok(())
    }
}

struct SimulatedService {
    device: SimulatedDevice,
    generation: u32,
    uuid: Uuid,
    characteristics: Vec<Uuid>,
}

#[async_trait]
impl GattService for SimulatedService {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn characteristic(&self, uuid: Uuid) -> Result<Arc<dyn Characteristic>, TransportError> {
        if !self.characteristics.contains(&uuid) {
            return Err(TransportError::CharacteristicNotFound(uuid));
        }
        Ok(Arc::new(SimulatedCharacteristic {
            device: self.device.clone(),
            generation: self.generation,
            uuid,
        }))
    }
}

struct SimulatedCharacteristic {
    device: SimulatedDevice,
    generation: u32,
    uuid: Uuid,
}

#[async_trait]
impl Characteristic for SimulatedCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn read(&self) -> Result<Vec<u8>, TransportError> {
        let state = self.device.state.read();
        SimulatedSession::live(&state, self.generation)?;
        if let Some(error) = state.read_failures.get(&self.uuid) {
            return Err(error.clone());
        }
        Ok(state.values.get(&self.uuid).cloned().unwrap_or_default())
    }

    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        let mut state = self.device.state.write();
        SimulatedSession::live(&state, self.generation)?;
        if let Some(error) = state.write_failures.get(&self.uuid) {
            return Err(error.clone());
        }
        state
            .writes
            .entry(self.uuid)
            .or_default()
            .push((data.to_vec(), mode));
        state.values.insert(self.uuid, data.to_vec());
        Ok(())
    }

    async fn subscribe(&self, handler: NotificationHandler) -> Result<(), TransportError> {
        let mut state = self.device.state.write();
        SimulatedSession::live(&state, self.generation)?;
        state.subscribers.entry(self.uuid).or_default().push(handler);
        Ok(())
    }
}

/// Transport over a fixed set of simulated devices
#[derive(Clone, Default)]
pub struct SimulatedTransport {
    devices: Vec<SimulatedDevice>,
}

impl SimulatedTransport {
    /// Transport offering the given devices, in discovery order
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self { devices }
    }

    /// Transport offering one device
    pub fn single(device: SimulatedDevice) -> Self {
        Self::new(vec![device])
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn discover(
        &self,
        name_prefix: &str,
        services: &[Uuid],
    ) -> Result<Arc<dyn TransportHandle>, TransportError> {
        tracing::debug!(name_prefix, services = services.len(), "simulated scan");
        self.devices
            .iter()
            .find(|device| device.name.starts_with(name_prefix))
            .map(|device| Arc::new(device.clone()) as Arc<dyn TransportHandle>)
            .ok_or_else(|| TransportError::DeviceNotFound(name_prefix.to_string()))
    }
}
