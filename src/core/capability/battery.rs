//! Battery level handler

use super::{characteristic_uuids, lookup, service_uuids, Capability, CapabilityId, CharacteristicSlot};
use crate::core::codec::{battery, BatteryLevel};
use crate::core::error::{DriverError, Result};
use crate::core::event::{DomainEvent, EventBus};
use crate::core::transport::GattSession;
use async_trait::async_trait;
use std::sync::Arc;

/// Battery service handler
pub struct BatteryHandler {
    bus: Arc<EventBus>,
    level: CharacteristicSlot,
}

impl BatteryHandler {
    /// Create an unbound handler
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            level: CharacteristicSlot::default(),
        }
    }

    /// Read the battery percentage
    pub async fn get_battery_level(&self) -> Result<BatteryLevel> {
        let data = self
            .level
            .get(CapabilityId::Battery)?
            .read()
            .await
            .map_err(DriverError::Read)?;
        Ok(battery::decode(&data)?)
    }
}

#[async_trait]
impl Capability for BatteryHandler {
    fn id(&self) -> CapabilityId {
        CapabilityId::Battery
    }

    async fn init(&self, session: Arc<dyn GattSession>) -> Result<()> {
        let level = lookup(
            session.as_ref(),
            service_uuids::BATTERY,
            characteristic_uuids::BATTERY_LEVEL,
        )
        .await?;

        let bus = self.bus.clone();
        level
            .subscribe(Arc::new(move |data: &[u8]| match battery::decode(data) {
                Ok(level) => bus.publish(DomainEvent::BatteryLevelChanged(level)),
                Err(e) => tracing::warn!(
                    error = %e,
                    frame = %hex::encode(data),
                    "discarding battery notification"
                ),
            }))
            .await?;

        self.level.bind(level);
        let level = self.get_battery_level().await?;
        tracing::debug!(level, "battery level read");
        Ok(())
    }
}
