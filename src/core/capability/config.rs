//! Configuration mode handler

use super::{characteristic_uuids, lookup, service_uuids, Capability, CapabilityId, CharacteristicSlot};
use crate::core::codec::ConfigMode;
use crate::core::error::{DriverError, Result};
use crate::core::transport::{GattSession, WriteMode};
use async_trait::async_trait;
use std::sync::Arc;

/// Config service handler
#[derive(Default)]
pub struct ConfigHandler {
    mode: CharacteristicSlot,
}

impl ConfigHandler {
    /// Create an unbound handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current mode. Unknown codes are an error.
    pub async fn get_configuration(&self) -> Result<ConfigMode> {
        let data = self
            .mode
            .get(CapabilityId::Config)?
            .read()
            .await
            .map_err(DriverError::Read)?;
        Ok(ConfigMode::decode(&data)?)
    }

    /// Switch mode
    pub async fn set_configuration(&self, mode: ConfigMode) -> Result<()> {
        let characteristic = self.mode.get(CapabilityId::Config)?;
        tracing::info!(%mode, "setting configuration");
        characteristic
            .write(&mode.encode(), WriteMode::WithResponse)
            .await
            .map_err(DriverError::Write)
    }
}

#[async_trait]
impl Capability for ConfigHandler {
    fn id(&self) -> CapabilityId {
        CapabilityId::Config
    }

    async fn init(&self, session: Arc<dyn GattSession>) -> Result<()> {
        let mode = lookup(
            session.as_ref(),
            service_uuids::CONFIG,
            characteristic_uuids::CONFIG_MODE,
        )
        .await?;
        self.mode.bind(mode);
        let current = self.get_configuration().await?;
        tracing::debug!(mode = %current, "configuration read");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::DecodeError;
    use crate::core::simulator::SimulatedDevice;
    use crate::core::transport::TransportHandle;

    #[tokio::test]
    async fn test_get_and_set() {
        let device = SimulatedDevice::new("FlowIO");
        let handler = ConfigHandler::new();
        handler.init(device.open_session().await.unwrap()).await.unwrap();

        assert_eq!(handler.get_configuration().await.unwrap(), ConfigMode::General);
        handler.set_configuration(ConfigMode::VacuumSeries).await.unwrap();
        assert_eq!(handler.get_configuration().await.unwrap(), ConfigMode::VacuumSeries);
        assert_eq!(device.value(characteristic_uuids::CONFIG_MODE), Some(vec![3]));
    }

    #[tokio::test]
    async fn test_unknown_mode_fails_init() {
        let device = SimulatedDevice::new("FlowIO");
        device.set_value(characteristic_uuids::CONFIG_MODE, &[9]);
        let handler = ConfigHandler::new();

        let err = handler
            .init(device.open_session().await.unwrap())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DriverError::Decode(DecodeError::UnknownCode { kind: "configuration", code: 9 })
        );
    }
}
