//! PID settings and goals handler

use super::{characteristic_uuids, lookup, service_uuids, Capability, CapabilityId, CharacteristicSlot};
use crate::core::codec::{PidGoals, PidSettings};
use crate::core::error::{DriverError, Result};
use crate::core::transport::{GattSession, WriteMode};
use async_trait::async_trait;
use std::sync::Arc;

/// PID service handler
#[derive(Default)]
pub struct PidHandler {
    settings: CharacteristicSlot,
    goals: CharacteristicSlot,
}

impl PidHandler {
    /// Create an unbound handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the settings record
    pub async fn get_settings(&self) -> Result<PidSettings> {
        let data = self
            .settings
            .get(CapabilityId::Pid)?
            .read()
            .await
            .map_err(DriverError::Read)?;
        Ok(PidSettings::decode(&data)?)
    }

    /// Write the settings record
    pub async fn set_settings(&self, settings: &PidSettings) -> Result<()> {
        let characteristic = self.settings.get(CapabilityId::Pid)?;
        characteristic
            .write(&settings.encode(), WriteMode::WithResponse)
            .await
            .map_err(DriverError::Write)
    }

    /// Read the goals record
    pub async fn get_goals(&self) -> Result<PidGoals> {
        let data = self
            .goals
            .get(CapabilityId::Pid)?
            .read()
            .await
            .map_err(DriverError::Read)?;
        Ok(PidGoals::decode(&data)?)
    }

    /// Write the goals record
    pub async fn set_goals(&self, goals: &PidGoals) -> Result<()> {
        let characteristic = self.goals.get(CapabilityId::Pid)?;
        characteristic
            .write(&goals.encode(), WriteMode::WithResponse)
            .await
            .map_err(DriverError::Write)
    }
}

#[async_trait]
impl Capability for PidHandler {
    fn id(&self) -> CapabilityId {
        CapabilityId::Pid
    }

    async fn init(&self, session: Arc<dyn GattSession>) -> Result<()> {
        let settings = lookup(
            session.as_ref(),
            service_uuids::PID,
            characteristic_uuids::PID_SETTINGS,
        )
        .await?;
        let goals = lookup(session.as_ref(), service_uuids::PID, characteristic_uuids::PID_GOALS).await?;

        let settings_len = settings.read().await?.len();
        let goals_len = goals.read().await?.len();
        tracing::trace!(settings_len, goals_len, "pid records readable");

        self.settings.bind(settings);
        self.goals.bind(goals);
        Ok(())
    }
}
