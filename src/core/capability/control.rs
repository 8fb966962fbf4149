//! Actuator control handler
//!
//! Writes command frames without acknowledgement and tracks the hardware
//! status notifications. The last command sent is remembered so that a PWM
//! change can be applied to whatever the device is currently doing.

use super::{characteristic_uuids, lookup, service_uuids, Capability, CapabilityId, CharacteristicSlot};
use crate::core::codec::{Action, ControlCommand, HardwareStatus, Ports, PUMP_MAX_PWM};
use crate::core::error::{DriverError, Result};
use crate::core::event::{DomainEvent, EventBus};
use crate::core::transport::{GattSession, WriteMode};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// Pump selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pump {
    /// Pump 1 (inflation)
    One,
    /// Pump 2 (vacuum)
    Two,
}

/// Cached PWM targets. `None` until the caller sets one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpTargets {
    /// Pump 1 target
    pub pump1: Option<u8>,
    /// Pump 2 target
    pub pump2: Option<u8>,
}

/// Control service handler
pub struct ControlHandler {
    bus: Arc<EventBus>,
    command: CharacteristicSlot,
    hardware_status: CharacteristicSlot,
    status: Arc<RwLock<HardwareStatus>>,
    last_command: RwLock<Option<ControlCommand>>,
    pump_targets: RwLock<PumpTargets>,
}

impl ControlHandler {
    /// Create an unbound handler
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            command: CharacteristicSlot::default(),
            hardware_status: CharacteristicSlot::default(),
            status: Arc::new(RwLock::new(HardwareStatus::default())),
            last_command: RwLock::new(None),
            pump_targets: RwLock::new(PumpTargets::default()),
        }
    }

    /// Latest hardware status snapshot
    pub fn status(&self) -> HardwareStatus {
        self.status.read().clone()
    }

    /// Last command handed to [`send_command`](Self::send_command), sent or not
    pub fn last_command(&self) -> Option<ControlCommand> {
        *self.last_command.read()
    }

    /// Cached PWM targets
    pub fn pump_targets(&self) -> PumpTargets {
        *self.pump_targets.read()
    }

    /// Read the status characteristic explicitly
    pub async fn check_hardware_status(&self) -> Result<HardwareStatus> {
        let characteristic = self.hardware_status.get(CapabilityId::Control)?;
        let data = characteristic.read().await.map_err(DriverError::Read)?;
        let status = HardwareStatus::decode(&data)?;
        *self.status.write() = status.clone();
        Ok(status)
    }

    /// Write a command frame.
    ///
    /// The command is recorded as the last command before the write so a
    /// later PWM update can replay it. Publishes `CommandSent` or
    /// `CommandFailed`; a failed write is also returned to the caller.
    pub async fn send_command(&self, command: ControlCommand) -> Result<()> {
        *self.last_command.write() = Some(command);
        let frame = command.encode();
        tracing::debug!(%command, frame = %hex::encode(&frame), "sending control command");

        let outcome = match self.command.get(CapabilityId::Control) {
            Ok(characteristic) => characteristic
                .write(&frame, WriteMode::WithoutResponse)
                .await
                .map_err(DriverError::Write),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.bus.publish(DomainEvent::CommandSent(command));
                Ok(())
            }
            Err(e) => {
                tracing::warn!(%command, error = %e, "control command failed");
                self.bus.publish(DomainEvent::CommandFailed {
                    command,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Inflate `ports`. PWM defaults to the pump 1 target, else full power.
    pub async fn start_inflation(&self, ports: impl Into<Ports>, pump_pwm: Option<u8>) -> Result<()> {
        let pwm = pump_pwm
            .or(self.pump_targets.read().pump1)
            .unwrap_or(PUMP_MAX_PWM);
        self.send_command(ControlCommand::new(Action::Inflate, ports, pwm))
            .await
    }

    /// Vacuum `ports`. PWM defaults to the pump 2 target, else full power.
    pub async fn start_vacuum(&self, ports: impl Into<Ports>, pump_pwm: Option<u8>) -> Result<()> {
        let pwm = pump_pwm
            .or(self.pump_targets.read().pump2)
            .unwrap_or(PUMP_MAX_PWM);
        self.send_command(ControlCommand::new(Action::Vacuum, ports, pwm))
            .await
    }

    /// Vent `ports` to atmosphere
    pub async fn start_release(&self, ports: impl Into<Ports>) -> Result<()> {
        self.send_command(ControlCommand::new(Action::Release, ports, 0))
            .await
    }

    /// Stop whatever `ports` are doing
    pub async fn stop_action(&self, ports: impl Into<Ports>) -> Result<()> {
        self.send_command(ControlCommand::new(Action::Stop, ports, 0))
            .await
    }

    /// Stop everything
    pub async fn stop_all_actions(&self) -> Result<()> {
        self.stop_action(Ports::ALL).await
    }

    /// Set the pump 1 PWM target
    pub async fn set_pump1_pwm(&self, pwm: u8) -> Result<()> {
        self.set_pump_pwm(Pump::One, pwm).await
    }

    /// Set the pump 2 PWM target
    pub async fn set_pump2_pwm(&self, pwm: u8) -> Result<()> {
        self.set_pump_pwm(Pump::Two, pwm).await
    }

    /// Cache a PWM target and, if that pump is running, replay the last
    /// command with the new PWM. A busy peripheral is not an error here: the
    /// next write supersedes this one.
    pub async fn set_pump_pwm(&self, pump: Pump, pwm: u8) -> Result<()> {
        let running = {
            let mut targets = self.pump_targets.write();
            let status = self.status.read();
            match pump {
                Pump::One => {
                    targets.pump1 = Some(pwm);
                    status.pump1
                }
                Pump::Two => {
                    targets.pump2 = Some(pwm);
                    status.pump2
                }
            }
        };
        if !running {
            return Ok(());
        }

        let last = self.last_command();
        let Some(last) = last else {
            return Ok(());
        };

        match self.send_command(last.with_pwm(pwm)).await {
            Err(e) if e.is_busy() => {
                tracing::debug!(?pump, pwm, "device busy, PWM update dropped");
                Ok(())
            }
            other => other,
        }
    }
}

#[async_trait]
impl Capability for ControlHandler {
    fn id(&self) -> CapabilityId {
        CapabilityId::Control
    }

    async fn init(&self, session: Arc<dyn GattSession>) -> Result<()> {
        let command = lookup(
            session.as_ref(),
            service_uuids::CONTROL,
            characteristic_uuids::CONTROL_COMMAND,
        )
        .await?;
        let hardware_status = lookup(
            session.as_ref(),
            service_uuids::CONTROL,
            characteristic_uuids::HARDWARE_STATUS,
        )
        .await?;

        let status = self.status.clone();
        let bus = self.bus.clone();
        hardware_status
            .subscribe(Arc::new(move |data: &[u8]| match HardwareStatus::decode(data) {
                Ok(decoded) => {
                    *status.write() = decoded.clone();
                    bus.publish(DomainEvent::HardwareStatusChanged(decoded));
                }
                Err(e) => tracing::warn!(
                    error = %e,
                    frame = %hex::encode(data),
                    "discarding hardware status notification"
                ),
            }))
            .await?;

        self.command.bind(command);
        self.hardware_status.bind(hardware_status);
        self.check_hardware_status().await?;
        Ok(())
    }
}
