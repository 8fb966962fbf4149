//! Auto power-off timer handler

use super::{characteristic_uuids, lookup, service_uuids, Capability, CapabilityId, CharacteristicSlot};
use crate::core::codec::PowerOffStatus;
use crate::core::error::{DriverError, Result};
use crate::core::event::{DomainEvent, EventBus};
use crate::core::transport::{GattSession, WriteMode};
use async_trait::async_trait;
use std::sync::Arc;

/// Power-off service handler
pub struct PowerOffHandler {
    bus: Arc<EventBus>,
    timer: CharacteristicSlot,
}

impl PowerOffHandler {
    /// Create an unbound handler
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            timer: CharacteristicSlot::default(),
        }
    }

    /// Read the timer
    pub async fn get_remaining_time(&self) -> Result<PowerOffStatus> {
        let data = self
            .timer
            .get(CapabilityId::PowerOff)?
            .read()
            .await
            .map_err(DriverError::Read)?;
        Ok(PowerOffStatus::decode(&data))
    }

    /// Set the timer: minutes (1..=254), `Off` (power down now) or `Disabled`
    pub async fn set_timer(&self, status: impl Into<PowerOffStatus>) -> Result<()> {
        let status = status.into();
        let characteristic = self.timer.get(CapabilityId::PowerOff)?;
        tracing::info!(%status, "setting power-off timer");
        characteristic
            .write(&status.encode(), WriteMode::WithResponse)
            .await
            .map_err(DriverError::Write)
    }
}

#[async_trait]
impl Capability for PowerOffHandler {
    fn id(&self) -> CapabilityId {
        CapabilityId::PowerOff
    }

    async fn init(&self, session: Arc<dyn GattSession>) -> Result<()> {
        let timer = lookup(
            session.as_ref(),
            service_uuids::POWER_OFF,
            characteristic_uuids::POWER_OFF_TIMER,
        )
        .await?;

        let bus = self.bus.clone();
        timer
            .subscribe(Arc::new(move |data: &[u8]| {
                bus.publish(DomainEvent::PowerOffStatusChanged(PowerOffStatus::decode(data)));
            }))
            .await?;

        self.timer.bind(timer);
        self.get_remaining_time().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::Topic;
    use crate::core::simulator::SimulatedDevice;
    use crate::core::transport::TransportHandle;

    #[tokio::test]
    async fn test_timer_round_trip() {
        let device = SimulatedDevice::new("FlowIO");
        let handler = PowerOffHandler::new(Arc::new(EventBus::new()));
        handler.init(device.open_session().await.unwrap()).await.unwrap();

        assert_eq!(handler.get_remaining_time().await.unwrap(), PowerOffStatus::Disabled);

        handler.set_timer(15).await.unwrap();
        assert_eq!(
            handler.get_remaining_time().await.unwrap(),
            PowerOffStatus::Remaining { minutes: 15 }
        );

        handler.set_timer(PowerOffStatus::Off).await.unwrap();
        assert_eq!(device.value(characteristic_uuids::POWER_OFF_TIMER), Some(vec![0]));
    }

    #[tokio::test]
    async fn test_notifications_published() {
        let device = SimulatedDevice::new("FlowIO");
        let bus = Arc::new(EventBus::new());
        let handler = PowerOffHandler::new(bus.clone());
        handler.init(device.open_session().await.unwrap()).await.unwrap();
        let mut rx = bus.subscribe_channel(Topic::PowerOffStatus);

        device.notify(characteristic_uuids::POWER_OFF_TIMER, &[4]);
        device.notify(characteristic_uuids::POWER_OFF_TIMER, &[]);

        assert_eq!(
            rx.try_recv().unwrap(),
            DomainEvent::PowerOffStatusChanged(PowerOffStatus::Remaining { minutes: 4 })
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            DomainEvent::PowerOffStatusChanged(PowerOffStatus::Disabled)
        );
    }
}
