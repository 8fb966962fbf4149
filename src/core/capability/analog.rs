//! Analog sampling handler

use super::{characteristic_uuids, lookup, service_uuids, Capability, CapabilityId, CharacteristicSlot};
use crate::core::codec::{AnalogMode, AnalogSamples};
use crate::core::error::{DriverError, Result};
use crate::core::event::{DomainEvent, EventBus};
use crate::core::transport::{GattSession, WriteMode};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// Analog service handler
pub struct AnalogHandler {
    bus: Arc<EventBus>,
    values: CharacteristicSlot,
    averaging_window: RwLock<u8>,
}

impl AnalogHandler {
    /// Create an unbound handler
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            values: CharacteristicSlot::default(),
            averaging_window: RwLock::new(1),
        }
    }

    /// Averaging window used by the last continuous request
    pub fn averaging_window(&self) -> u8 {
        *self.averaging_window.read()
    }

    /// Send a sampling request
    pub async fn request_values(&self, mode: AnalogMode) -> Result<()> {
        let characteristic = self.values.get(CapabilityId::Analog)?;
        if let AnalogMode::Continuous { window } = mode {
            *self.averaging_window.write() = window;
        }
        let frame = mode.encode();
        tracing::debug!(?mode, frame = %hex::encode(&frame), "analog request");
        characteristic
            .write(&frame, WriteMode::WithResponse)
            .await
            .map_err(DriverError::Write)
    }

    /// Stop continuous sampling
    pub async fn stop(&self) -> Result<()> {
        self.request_values(AnalogMode::Stop).await
    }

    /// Request one frame
    pub async fn request_single(&self) -> Result<()> {
        self.request_values(AnalogMode::Single).await
    }

    /// Start streaming. Without a window, the previous one is reused.
    pub async fn request_continuous(&self, window: Option<u8>) -> Result<()> {
        let window = window.unwrap_or_else(|| self.averaging_window());
        self.request_values(AnalogMode::Continuous { window }).await
    }
}

#[async_trait]
impl Capability for AnalogHandler {
    fn id(&self) -> CapabilityId {
        CapabilityId::Analog
    }

    async fn init(&self, session: Arc<dyn GattSession>) -> Result<()> {
        let values = lookup(
            session.as_ref(),
            service_uuids::ANALOG,
            characteristic_uuids::ANALOG_VALUES,
        )
        .await?;

        let bus = self.bus.clone();
        values
            .subscribe(Arc::new(move |data: &[u8]| match AnalogSamples::decode(data) {
                Ok(samples) => bus.publish(DomainEvent::AnalogSamplesReceived(samples)),
                Err(e) => tracing::warn!(
                    error = %e,
                    frame = %hex::encode(data),
                    "discarding analog sample frame"
                ),
            }))
            .await?;

        self.values.bind(values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::ANALOG_FRAME_LEN;
    use crate::core::event::Topic;
    use crate::core::simulator::SimulatedDevice;
    use crate::core::transport::TransportHandle;

    async fn bound_handler() -> (SimulatedDevice, Arc<EventBus>, AnalogHandler) {
        let device = SimulatedDevice::new("FlowIO");
        let bus = Arc::new(EventBus::new());
        let handler = AnalogHandler::new(bus.clone());
        handler.init(device.open_session().await.unwrap()).await.unwrap();
        (device, bus, handler)
    }

    #[tokio::test]
    async fn test_request_frames() {
        let (device, _bus, handler) = bound_handler().await;
        handler.request_single().await.unwrap();
        handler.request_continuous(Some(10)).await.unwrap();
        handler.request_continuous(None).await.unwrap();
        handler.stop().await.unwrap();

        let frames: Vec<Vec<u8>> = device
            .writes(characteristic_uuids::ANALOG_VALUES)
            .into_iter()
            .map(|(frame, _)| frame)
            .collect();
        assert_eq!(frames, vec![vec![0x01], vec![0x02, 10], vec![0x02, 10], vec![0x00]]);
        assert_eq!(handler.averaging_window(), 10);
    }

    #[tokio::test]
    async fn test_default_window() {
        let (device, _bus, handler) = bound_handler().await;
        handler.request_continuous(None).await.unwrap();
        let (frame, mode) = device.writes(characteristic_uuids::ANALOG_VALUES).remove(0);
        assert_eq!(frame, vec![0x02, 1]);
        assert_eq!(mode, WriteMode::WithResponse);
    }

    #[tokio::test]
    async fn test_sample_notifications() {
        let (device, bus, _handler) = bound_handler().await;
        let mut rx = bus.subscribe_channel(Topic::AnalogSamples);

        device.notify(characteristic_uuids::ANALOG_VALUES, &[0u8; 30]);
        assert!(rx.try_recv().is_err());

        let mut frame = [0u8; ANALOG_FRAME_LEN];
        frame[30] = 0xe8;
        frame[31] = 0x03;
        device.notify(characteristic_uuids::ANALOG_VALUES, &frame);
        match rx.try_recv().unwrap() {
            DomainEvent::AnalogSamplesReceived(samples) => {
                assert_eq!(samples.channel(16), Some(1000));
                assert_eq!(samples.channel(1), Some(0));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
