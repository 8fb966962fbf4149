//! Capability handlers and registry
//!
//! Each FlowIO sub-protocol lives in one GATT service and is driven by one
//! handler. Handlers are created once per session and survive reconnects:
//! `init` rebinds their characteristic references to the new GATT session
//! while cached protocol state (last command, PWM targets, averaging window)
//! is kept.

pub mod analog;
pub mod battery;
pub mod config;
pub mod control;
pub mod pid;
pub mod power_off;

pub use analog::AnalogHandler;
pub use battery::BatteryHandler;
pub use config::ConfigHandler;
pub use control::{ControlHandler, Pump, PumpTargets};
pub use pid::PidHandler;
pub use power_off::PowerOffHandler;

use crate::core::error::{DriverError, Result};
use crate::core::event::EventBus;
use crate::core::transport::{Characteristic, GattSession, TransportError};
use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// FlowIO service UUIDs
pub mod service_uuids {
    use uuid::Uuid;

    /// Auto power-off timer
    pub const POWER_OFF: Uuid = Uuid::from_u128(0x0b0b0b0b_0b0b_0b0b_0b0b_00000000aa01);
    /// Pneumatic configuration
    pub const CONFIG: Uuid = Uuid::from_u128(0x0b0b0b0b_0b0b_0b0b_0b0b_00000000aa03);
    /// Actuator control
    pub const CONTROL: Uuid = Uuid::from_u128(0x0b0b0b0b_0b0b_0b0b_0b0b_00000000aa04);
    /// Analog sampling
    pub const ANALOG: Uuid = Uuid::from_u128(0x0b0b0b0b_0b0b_0b0b_0b0b_00000000aa07);
    /// Closed-loop PID
    pub const PID: Uuid = Uuid::from_u128(0x0b0b0b0b_0b0b_0b0b_0b0b_00000000aa08);
    /// Battery Service
    pub const BATTERY: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
}

/// FlowIO characteristic UUIDs
pub mod characteristic_uuids {
    use uuid::Uuid;

    /// Power-off timer minutes
    pub const POWER_OFF_TIMER: Uuid = Uuid::from_u128(0x0b0b0b0b_0b0b_0b0b_0b0b_c1000000aa01);
    /// Configuration mode
    pub const CONFIG_MODE: Uuid = Uuid::from_u128(0x0b0b0b0b_0b0b_0b0b_0b0b_c1000000aa03);
    /// Control command
    pub const CONTROL_COMMAND: Uuid = Uuid::from_u128(0x0b0b0b0b_0b0b_0b0b_0b0b_c1000000aa04);
    /// Hardware status
    pub const HARDWARE_STATUS: Uuid = Uuid::from_u128(0x0b0b0b0b_0b0b_0b0b_0b0b_c2000000aa04);
    /// 16-channel analog values
    pub const ANALOG_VALUES: Uuid = Uuid::from_u128(0x0b0b0b0b_0b0b_0b0b_0b0b_c2000000aa07);
    /// PID settings record
    pub const PID_SETTINGS: Uuid = Uuid::from_u128(0x0b0b0b0b_0b0b_0b0b_0b0b_c1000000aa08);
    /// PID goals record
    pub const PID_GOALS: Uuid = Uuid::from_u128(0x0b0b0b0b_0b0b_0b0b_0b0b_c2000000aa08);
    /// Battery Level
    pub const BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
}

/// Capability identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityId {
    /// Actuator control
    Control,
    /// Analog sampling
    Analog,
    /// Closed-loop PID
    Pid,
    /// Pneumatic configuration
    Config,
    /// Auto power-off timer
    PowerOff,
    /// Battery level
    Battery,
}

impl CapabilityId {
    /// All capabilities, in registry order
    pub const ALL: [CapabilityId; 6] = [
        CapabilityId::Control,
        CapabilityId::Analog,
        CapabilityId::Pid,
        CapabilityId::Config,
        CapabilityId::PowerOff,
        CapabilityId::Battery,
    ];

    /// GATT service hosting the capability
    pub fn service_uuid(self) -> Uuid {
        match self {
            Self::Control => service_uuids::CONTROL,
            Self::Analog => service_uuids::ANALOG,
            Self::Pid => service_uuids::PID,
            Self::Config => service_uuids::CONFIG,
            Self::PowerOff => service_uuids::POWER_OFF,
            Self::Battery => service_uuids::BATTERY,
        }
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Control => "control-service",
            Self::Analog => "analog-service",
            Self::Pid => "pid-service",
            Self::Config => "config-service",
            Self::PowerOff => "power-off-service",
            Self::Battery => "battery-service",
        };
        f.write_str(name)
    }
}

/// A sub-protocol handler
#[async_trait]
pub trait Capability: Send + Sync {
    /// Identifier
    fn id(&self) -> CapabilityId;

    /// (Re)bind characteristics on a fresh GATT session and run the initial read
    async fn init(&self, session: Arc<dyn GattSession>) -> Result<()>;
}

/// Swappable characteristic reference
#[derive(Default)]
pub(crate) struct CharacteristicSlot(RwLock<Option<Arc<dyn Characteristic>>>);

impl CharacteristicSlot {
    pub(crate) fn bind(&self, characteristic: Arc<dyn Characteristic>) {
        *self.0.write() = Some(characteristic);
    }

    pub(crate) fn get(&self, capability: CapabilityId) -> Result<Arc<dyn Characteristic>> {
        self.0
            .read()
            .clone()
            .ok_or(DriverError::Precondition(capability))
    }
}

/// Look up one characteristic of a primary service
pub(crate) async fn lookup(
    session: &dyn GattSession,
    service: Uuid,
    characteristic: Uuid,
) -> std::result::Result<Arc<dyn Characteristic>, TransportError> {
    session
        .primary_service(service)
        .await?
        .characteristic(characteristic)
        .await
}

/// Fixed mapping from capability to handler
pub struct CapabilityRegistry {
    control: Arc<ControlHandler>,
    analog: Arc<AnalogHandler>,
    pid: Arc<PidHandler>,
    config: Arc<ConfigHandler>,
    power_off: Arc<PowerOffHandler>,
    battery: Arc<BatteryHandler>,
}

impl CapabilityRegistry {
    /// Create one handler per capability, all publishing on `bus`
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            control: Arc::new(ControlHandler::new(bus.clone())),
            analog: Arc::new(AnalogHandler::new(bus.clone())),
            pid: Arc::new(PidHandler::new()),
            config: Arc::new(ConfigHandler::new()),
            power_off: Arc::new(PowerOffHandler::new(bus.clone())),
            battery: Arc::new(BatteryHandler::new(bus)),
        }
    }

    /// Handler for a capability
    pub fn get(&self, id: CapabilityId) -> Arc<dyn Capability> {
        match id {
            CapabilityId::Control => self.control.clone(),
            CapabilityId::Analog => self.analog.clone(),
            CapabilityId::Pid => self.pid.clone(),
            CapabilityId::Config => self.config.clone(),
            CapabilityId::PowerOff => self.power_off.clone(),
            CapabilityId::Battery => self.battery.clone(),
        }
    }

    /// Every handler, in registry order
    pub fn iter(&self) -> impl Iterator<Item = Arc<dyn Capability>> + '_ {
        CapabilityId::ALL.into_iter().map(|id| self.get(id))
    }

    /// Service UUIDs of every registered capability
    pub fn service_uuids(&self) -> Vec<Uuid> {
        CapabilityId::ALL.iter().map(|id| id.service_uuid()).collect()
    }

    /// Initialise every handler concurrently. The first failure fails the whole call.
    pub async fn init_all(&self, session: Arc<dyn GattSession>) -> Result<()> {
        let inits = self.iter().map(|capability| {
            let session = session.clone();
            async move {
                let id = capability.id();
                capability.init(session).await.map_err(|e| {
                    tracing::warn!(capability = %id, error = %e, "capability init failed");
                    DriverError::capability_init(id, e)
                })?;
                tracing::debug!(capability = %id, "capability initialised");
                Ok::<(), DriverError>(())
            }
        });
        try_join_all(inits).await?;
        Ok(())
    }

    /// Actuator control handler
    pub fn control(&self) -> &Arc<ControlHandler> {
        &self.control
    }

    /// Analog sampling handler
    pub fn analog(&self) -> &Arc<AnalogHandler> {
        &self.analog
    }

    /// PID handler
    pub fn pid(&self) -> &Arc<PidHandler> {
        &self.pid
    }

    /// Configuration handler
    pub fn config(&self) -> &Arc<ConfigHandler> {
        &self.config
    }

    /// Power-off timer handler
    pub fn power_off(&self) -> &Arc<PowerOffHandler> {
        &self.power_off
    }

    /// Battery handler
    pub fn battery(&self) -> &Arc<BatteryHandler> {
        &self.battery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::simulator::SimulatedDevice;
    use crate::core::transport::TransportHandle;

    #[test]
    fn test_registry_order_and_uuids() {
        let registry = CapabilityRegistry::new(Arc::new(EventBus::new()));
        let ids: Vec<CapabilityId> = registry.iter().map(|c| c.id()).collect();
        assert_eq!(ids, CapabilityId::ALL.to_vec());

        let uuids = registry.service_uuids();
        assert_eq!(uuids.len(), 6);
        assert!(uuids.contains(&service_uuids::BATTERY));
        assert_eq!(
            CapabilityId::Control.service_uuid().to_string(),
            "0b0b0b0b-0b0b-0b0b-0b0b-00000000aa04"
        );
    }

    #[tokio::test]
    async fn test_init_all() {
        let device = SimulatedDevice::new("FlowIO 1");
        let session = device.open_session().await.unwrap();
        let registry = CapabilityRegistry::new(Arc::new(EventBus::new()));

        registry.init_all(session).await.unwrap();
        assert_eq!(registry.battery().get_battery_level().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_init_all_reports_failing_capability() {
        let device = SimulatedDevice::new("FlowIO 1");
        device.remove_service(service_uuids::PID);
        let session = device.open_session().await.unwrap();
        let registry = CapabilityRegistry::new(Arc::new(EventBus::new()));

        let err = registry.init_all(session).await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::CapabilityInit { capability: CapabilityId::Pid, .. }
        ));
    }

    #[tokio::test]
    async fn test_use_before_init_is_precondition_failure() {
        let registry = CapabilityRegistry::new(Arc::new(EventBus::new()));
        let err = registry.config().get_configuration().await.unwrap_err();
        assert_eq!(err, DriverError::Precondition(CapabilityId::Config));
    }
}
