//! Session management for one FlowIO device
//!
//! A `Session` acquires a device through a [`Transport`], opens a GATT
//! session, initialises every capability handler and reports each change in
//! connection state on the event bus. Handlers live as long as the session
//! and are rebound on every (re)connect.

use crate::core::capability::{CapabilityId, CapabilityRegistry};
use crate::core::error::{DriverError, Result};
use crate::core::event::{ConnectionEvent, ConnectionKind, ConnectionReason, DomainEvent, EventBus};
use crate::core::state_machine::{ReconnectPolicy, SessionState, SessionStateMachine, StateTransition};
use crate::core::transport::{GattSession, Transport, TransportHandle};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Advertised name prefix of FlowIO devices
pub const DEVICE_NAME_PREFIX: &str = "FlowIO";

/// Reported for `id` and `name` before a device has been acquired
const UNKNOWN: &str = "Unknown";

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name prefix used when `reconnect` has to fall back to `connect`
    pub name_prefix: String,
    /// Reconnect budget
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name_prefix: DEVICE_NAME_PREFIX.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Connection to one FlowIO device
pub struct Session {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    registry: CapabilityRegistry,
    machine: Arc<RwLock<SessionStateMachine>>,
    /// Acquired device, kept across disconnects for `reconnect`
    handle: Option<Arc<dyn TransportHandle>>,
    /// Live GATT session
    gatt: Option<Arc<dyn GattSession>>,
    /// Bumped on every device acquisition; only the newest disconnect listener reports
    listener_generation: Arc<AtomicU64>,
}

impl Session {
    /// Create a disconnected session using `transport` to find devices
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        Self {
            machine: Arc::new(RwLock::new(SessionStateMachine::with_policy(config.reconnect))),
            registry: CapabilityRegistry::new(bus.clone()),
            config,
            transport,
            bus,
            handle: None,
            gatt: None,
            listener_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Event bus carrying every event of this session
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Capability handlers
    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.machine.read().state()
    }

    /// State transitions, oldest first
    pub fn history(&self) -> Vec<StateTransition> {
        self.machine.read().history().to_vec()
    }

    /// Consecutive failed reconnect attempts
    pub fn reconnect_attempts(&self) -> u32 {
        self.machine.read().reconnect_attempts()
    }

    /// Device identifier, or "Unknown"
    pub fn id(&self) -> String {
        self.handle
            .as_ref()
            .map(|h| h.id())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    /// Device name, or "Unknown"
    pub fn name(&self) -> String {
        self.handle
            .as_ref()
            .map(|h| h.name())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    /// Check if a device is acquired and its GATT link is up
    pub fn is_connected(&self) -> bool {
        self.handle.is_some() && self.gatt.as_ref().is_some_and(|g| g.is_connected())
    }

    /// Find a device whose name starts with `name_prefix`, connect and
    /// initialise every capability.
    ///
    /// `capabilities` narrows the services requested during discovery;
    /// all handlers are initialised regardless.
    pub async fn connect(&mut self, name_prefix: &str, capabilities: Option<&[CapabilityId]>) -> Result<()> {
        self.transition(SessionState::Connecting, "connect")?;

        let services: Vec<Uuid> = match capabilities {
            Some(ids) => ids.iter().map(|id| id.service_uuid()).collect(),
            None => self.registry.service_uuids(),
        };

        let handle = match self.transport.discover(name_prefix, &services).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(name_prefix, error = %e, "device acquisition failed");
                self.failed(ConnectionReason::ConnectionFailed);
                return Err(DriverError::TransportAcquisition(e));
            }
        };
        tracing::info!(id = %handle.id(), name = %handle.name(), "device acquired");
        self.watch_disconnect(handle.as_ref());
        self.handle = Some(handle.clone());

        match self.establish(handle.as_ref()).await {
            Ok(()) => {
                self.established()?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "connect failed");
                self.drop_gatt().await;
                self.failed(Self::failure_reason(&e));
                Err(e)
            }
        }
    }

    /// Re-establish the GATT link to the acquired device, retrying up to the
    /// configured budget. Falls back to `connect` when no device was acquired.
    pub async fn reconnect(&mut self) -> Result<()> {
        let Some(handle) = self.handle.clone() else {
            let name_prefix = self.config.name_prefix.clone();
            return self.connect(&name_prefix, None).await;
        };
        if self.is_connected() {
            tracing::debug!("already connected");
            return Ok(());
        }

        self.transition(SessionState::Reconnecting, "reconnect")?;
        loop {
            let error = match self.establish(handle.as_ref()).await {
                Ok(()) => return self.established(),
                Err(e) => e,
            };
            self.drop_gatt().await;

            let (retry, attempts) = {
                let mut machine = self.machine.write();
                let retry = machine.record_failed_attempt();
                (retry, machine.reconnect_attempts())
            };
            tracing::warn!(attempts, error = %error, "reconnect attempt failed");

            if retry {
                self.publish(ConnectionKind::ReconnectFailed, Self::failure_reason(&error));
                continue;
            }

            self.failed(ConnectionReason::ConnectionFailed);
            return Err(DriverError::ReconnectExhausted {
                attempts,
                last: Box::new(error),
            });
        }
    }

    /// Close the GATT link. No-op when not connected.
    pub async fn disconnect(&mut self) -> Result<()> {
        if !self.is_connected() {
            tracing::debug!("disconnect requested while not connected");
            return Ok(());
        }

        self.transition(SessionState::Disconnecting, "disconnect")?;
        self.drop_gatt().await;
        self.transition(SessionState::Disconnected, "disconnect")?;
        self.publish(ConnectionKind::Disconnected, ConnectionReason::Requested);
        tracing::info!(name = %self.name(), "disconnected");
        Ok(())
    }

    async fn establish(&mut self, handle: &dyn TransportHandle) -> Result<()> {
        let gatt = handle
            .open_session()
            .await
            .map_err(DriverError::SessionEstablishment)?;
        self.gatt = Some(gatt.clone());
        self.registry.init_all(gatt).await
    }

    async fn drop_gatt(&mut self) {
        if let Some(gatt) = self.gatt.take() {
            if let Err(e) = gatt.disconnect().await {
                tracing::warn!(error = %e, "failed to close GATT session");
            }
        }
    }

    fn established(&self) -> Result<()> {
        self.transition(SessionState::Connected, "capabilities initialised")?;
        self.publish(ConnectionKind::Connected, ConnectionReason::Established);
        tracing::info!(name = %self.name(), "connected");
        Ok(())
    }

    fn failed(&self, reason: ConnectionReason) {
        if let Err(e) = self.machine.write().transition(SessionState::Disconnected, Some("failed")) {
            tracing::warn!(error = %e, "state transition rejected");
        }
        self.publish(ConnectionKind::Disconnected, reason);
    }

    fn failure_reason(error: &DriverError) -> ConnectionReason {
        match error {
            DriverError::CapabilityInit { .. } => ConnectionReason::CapabilitiesUninitialised,
            _ => ConnectionReason::ConnectionFailed,
        }
    }

    fn transition(&self, to: SessionState, operation: &'static str) -> Result<()> {
        let mut machine = self.machine.write();
        let state = machine.state();
        machine
            .transition(to, Some(operation))
            .map_err(|_| DriverError::InvalidState { operation, state })
    }

    fn publish(&self, kind: ConnectionKind, reason: ConnectionReason) {
        self.bus
            .publish(DomainEvent::ConnectionStateChanged(ConnectionEvent::new(kind, reason)));
    }

    /// Report link loss from the transport, whatever the session state.
    ///
    /// Transports keep their disconnect handlers for the life of the device,
    /// so a listener from an earlier acquisition stays registered. It goes
    /// quiet once a newer one has been installed.
    fn watch_disconnect(&self, handle: &dyn TransportHandle) {
        let bus = self.bus.clone();
        let machine = self.machine.clone();
        let current = self.listener_generation.clone();
        let generation = current.fetch_add(1, Ordering::SeqCst) + 1;
        handle.on_disconnect(Arc::new(move || {
            if current.load(Ordering::SeqCst) != generation {
                tracing::trace!(generation, "stale disconnect listener");
                return;
            }
            {
                let mut machine = machine.write();
                if machine.state() == SessionState::Connected {
                    let _ = machine.transition(SessionState::Disconnected, Some("transport lost"));
                }
            }
            tracing::warn!("transport disconnected");
            bus.publish(DomainEvent::ConnectionStateChanged(ConnectionEvent::new(
                ConnectionKind::Disconnected,
                ConnectionReason::TransportLost,
            )));
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::capability::service_uuids;
    use crate::core::event::Topic;
    use crate::core::simulator::{SimulatedDevice, SimulatedTransport};
    use crate::core::transport::TransportError;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn session_with(device: &SimulatedDevice, max_attempts: u32) -> Session {
        let transport = Arc::new(SimulatedTransport::single(device.clone()));
        let config = SessionConfig {
            reconnect: ReconnectPolicy { max_attempts },
            ..Default::default()
        };
        Session::new(transport, config)
    }

    fn drain(rx: &mut UnboundedReceiver<DomainEvent>) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::ConnectionStateChanged(change) = event {
                events.push(change);
            }
        }
        events
    }

    fn event(kind: ConnectionKind, reason: ConnectionReason) -> ConnectionEvent {
        ConnectionEvent::new(kind, reason)
    }

    #[tokio::test]
    async fn test_connect() {
        let device = SimulatedDevice::new("FlowIO 2");
        let mut session = session_with(&device, 3);
        let mut rx = session.bus().subscribe_channel(Topic::ConnectionState);

        assert_eq!(session.id(), "Unknown");
        assert_eq!(session.name(), "Unknown");
        assert!(!session.is_connected());

        session.connect("FlowIO", None).await.unwrap();
        assert!(session.is_connected());
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.name(), "FlowIO 2");
        assert_eq!(
            drain(&mut rx),
            vec![event(ConnectionKind::Connected, ConnectionReason::Established)]
        );
        assert_eq!(
            session.capabilities().battery().get_battery_level().await.unwrap(),
            100
        );
    }

    #[tokio::test]
    async fn test_connect_twice_rejected() {
        let device = SimulatedDevice::new("FlowIO");
        let mut session = session_with(&device, 3);
        session.connect("FlowIO", None).await.unwrap();

        let err = session.connect("FlowIO", None).await.unwrap_err();
        assert_eq!(
            err,
            DriverError::InvalidState { operation: "connect", state: SessionState::Connected }
        );
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_no_device() {
        let device = SimulatedDevice::new("Other");
        let mut session = session_with(&device, 3);
        let mut rx = session.bus().subscribe_channel(Topic::ConnectionState);

        let err = session.connect("FlowIO", None).await.unwrap_err();
        assert!(matches!(err, DriverError::TransportAcquisition(TransportError::DeviceNotFound(_))));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(
            drain(&mut rx),
            vec![event(ConnectionKind::Disconnected, ConnectionReason::ConnectionFailed)]
        );
    }

    #[tokio::test]
    async fn test_gatt_connect_failure() {
        let device = SimulatedDevice::new("FlowIO");
        device.fail_open(1);
        let mut session = session_with(&device, 3);

        let err = session.connect("FlowIO", None).await.unwrap_err();
        assert!(matches!(err, DriverError::SessionEstablishment(_)));
        assert_eq!(session.name(), "FlowIO");
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_single_capability_failure_fails_connect() {
        let device = SimulatedDevice::new("FlowIO");
        device.remove_service(service_uuids::POWER_OFF);
        let mut session = session_with(&device, 3);
        let mut rx = session.bus().subscribe_channel(Topic::ConnectionState);

        let err = session.connect("FlowIO", None).await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::CapabilityInit { capability: CapabilityId::PowerOff, .. }
        ));
        assert_eq!(
            drain(&mut rx),
            vec![event(ConnectionKind::Disconnected, ConnectionReason::CapabilitiesUninitialised)]
        );
        assert!(!session.is_connected());
        assert!(!device.is_connected());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_link_loss_then_reconnect() {
        let device = SimulatedDevice::new("FlowIO");
        let mut session = session_with(&device, 3);
        session.connect("FlowIO", None).await.unwrap();
        let mut rx = session.bus().subscribe_channel(Topic::ConnectionState);
        let mut status = session.bus().subscribe_channel(Topic::HardwareStatus);

        device.drop_connection();
        assert!(!session.is_connected());
        assert_eq!(session.state(), SessionState::Disconnected);

        session.reconnect().await.unwrap();
        assert!(session.is_connected());
        assert_eq!(device.sessions_opened(), 2);
        assert_eq!(
            drain(&mut rx),
            vec![
                event(ConnectionKind::Disconnected, ConnectionReason::TransportLost),
                event(ConnectionKind::Connected, ConnectionReason::Established),
            ]
        );

        // Handlers are rebound to the new GATT session
        device.set_hardware_status([0x81, 0x00]);
        assert!(matches!(status.try_recv(), Ok(DomainEvent::HardwareStatusChanged(s)) if s.pump1));
        assert_eq!(
            session.capabilities().battery().get_battery_level().await.unwrap(),
            100
        );
    }

    #[tokio::test]
    async fn test_reconnect_retries_then_recovers() {
        let device = SimulatedDevice::new("FlowIO");
        let mut session = session_with(&device, 3);
        session.connect("FlowIO", None).await.unwrap();
        device.drop_connection();
        let mut rx = session.bus().subscribe_channel(Topic::ConnectionState);

        device.fail_open(2);
        session.reconnect().await.unwrap();
        assert_eq!(session.reconnect_attempts(), 0);
        assert_eq!(
            drain(&mut rx),
            vec![
                event(ConnectionKind::ReconnectFailed, ConnectionReason::ConnectionFailed),
                event(ConnectionKind::ReconnectFailed, ConnectionReason::ConnectionFailed),
                event(ConnectionKind::Connected, ConnectionReason::Established),
            ]
        );
    }

    #[tokio::test]
    async fn test_reconnect_budget_exhausted() {
        let device = SimulatedDevice::new("FlowIO");
        let mut session = session_with(&device, 2);
        session.connect("FlowIO", None).await.unwrap();
        device.drop_connection();
        let mut rx = session.bus().subscribe_channel(Topic::ConnectionState);

        device.remove_service(service_uuids::ANALOG);
        let err = session.reconnect().await.unwrap_err();
        assert!(matches!(err, DriverError::ReconnectExhausted { attempts: 3, .. }));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(device.sessions_opened(), 4);

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                event(ConnectionKind::ReconnectFailed, ConnectionReason::CapabilitiesUninitialised),
                event(ConnectionKind::ReconnectFailed, ConnectionReason::CapabilitiesUninitialised),
                event(ConnectionKind::Disconnected, ConnectionReason::ConnectionFailed),
            ]
        );

        // The budget is spent, but a good attempt still succeeds and resets it
        device.restore_service(service_uuids::ANALOG);
        session.reconnect().await.unwrap();
        assert_eq!(session.reconnect_attempts(), 0);
        assert_eq!(
            drain(&mut rx),
            vec![event(ConnectionKind::Connected, ConnectionReason::Established)]
        );
    }

    #[tokio::test]
    async fn test_reconnect_without_device_connects() {
        let device = SimulatedDevice::new("FlowIO");
        let mut session = session_with(&device, 3);
        session.reconnect().await.unwrap();
        assert!(session.is_connected());

        // Already connected: nothing to do
        session.reconnect().await.unwrap();
        assert_eq!(device.sessions_opened(), 1);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let device = SimulatedDevice::new("FlowIO");
        let mut session = session_with(&device, 3);
        session.connect("FlowIO", None).await.unwrap();
        let mut rx = session.bus().subscribe_channel(Topic::ConnectionState);

        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();
        assert!(!device.is_connected());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.name(), "FlowIO");
        assert_eq!(
            drain(&mut rx),
            vec![event(ConnectionKind::Disconnected, ConnectionReason::Requested)]
        );

        let states: Vec<SessionState> = session.history().iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                SessionState::Connecting,
                SessionState::Connected,
                SessionState::Disconnecting,
                SessionState::Disconnected,
            ]
        );
    }
}
