//! Closed-loop PID settings and goals
//!
//! Settings record (72 bytes):
//!
//! ```text
//! 0      positive action code
//! 1      negative action code
//! 2..72  5 × control block (14 bytes each)
//!          0  f32 proportional
//!          4  f32 integrative
//!          8  f32 differential
//!         12  u8  input channel (0 = disabled, 1..=16)
//!         13  u8  output ports bitmask
//! ```
//!
//! Goals record: 5 × `u16` (10 bytes).

use super::control::{Action, Ports};
use super::{expect_len, DecodeError};
use serde::{Deserialize, Serialize};

/// Number of PID loops on the device
pub const PID_CHANNELS: usize = 5;

/// Highest analog input a loop can read
pub const MAX_INPUT_CHANNEL: u8 = 16;

/// One PID loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidControl {
    /// Proportional gain
    pub proportional: f32,
    /// Integral gain
    pub integrative: f32,
    /// Derivative gain
    pub differential: f32,
    /// Analog input, 0 when the loop is disabled
    pub input_channel: u8,
    /// Ports driven by the loop
    pub output_port: Ports,
}

impl PidControl {
    /// Encoded block size
    pub const MEMORY_SIZE: usize = 14;

    /// Create a loop. An input channel outside 1..=16 disables it.
    pub fn new(
        input_channel: u8,
        output_port: impl Into<Ports>,
        proportional: f32,
        integrative: f32,
        differential: f32,
    ) -> Self {
        let input_channel = if (1..=MAX_INPUT_CHANNEL).contains(&input_channel) {
            input_channel
        } else {
            0
        };
        Self {
            proportional,
            integrative,
            differential,
            input_channel,
            output_port: output_port.into(),
        }
    }

    /// The disabled sentinel: channel 0, no ports, zero gains
    pub fn disabled() -> Self {
        Self::new(0, Ports::Packed(0), 0.0, 0.0, 0.0)
    }

    /// Check if the loop reads an input
    pub fn is_enabled(&self) -> bool {
        self.input_channel != 0
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.proportional.to_le_bytes());
        out.extend_from_slice(&self.integrative.to_le_bytes());
        out.extend_from_slice(&self.differential.to_le_bytes());
        out.push(self.input_channel);
        out.push(self.output_port.code());
    }

    fn read_from(block: &[u8]) -> Self {
        let f32_at = |offset: usize| {
            f32::from_le_bytes([
                block[offset],
                block[offset + 1],
                block[offset + 2],
                block[offset + 3],
            ])
        };
        Self::new(
            block[12],
            Ports::Packed(block[13]),
            f32_at(0),
            f32_at(4),
            f32_at(8),
        )
    }
}

impl Default for PidControl {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Full PID configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidSettings {
    /// Action used to raise the measured value
    pub positive_command: Action,
    /// Action used to lower it
    pub negative_command: Action,
    /// The five loops
    pub controls: [PidControl; PID_CHANNELS],
}

impl Default for PidSettings {
    fn default() -> Self {
        Self {
            positive_command: Action::Inflate,
            negative_command: Action::Release,
            controls: [PidControl::disabled(); PID_CHANNELS],
        }
    }
}

impl PidSettings {
    /// Encoded record size
    pub const FRAME_LEN: usize = 2 + PID_CHANNELS * PidControl::MEMORY_SIZE;

    /// Encode the settings record
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::FRAME_LEN);
        out.push(self.positive_command.code());
        out.push(self.negative_command.code());
        for control in &self.controls {
            control.write_to(&mut out);
        }
        out
    }

    /// Decode a settings record
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        expect_len("pid settings", data, Self::FRAME_LEN)?;
        let positive_command = Action::from_code(data[0])?;
        let negative_command = Action::from_code(data[1])?;

        let mut controls = [PidControl::disabled(); PID_CHANNELS];
        for (control, block) in controls
            .iter_mut()
            .zip(data[2..].chunks_exact(PidControl::MEMORY_SIZE))
        {
            *control = PidControl::read_from(block);
        }

        Ok(Self {
            positive_command,
            negative_command,
            controls,
        })
    }
}

/// Set-points for the five loops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidGoals(pub [u16; PID_CHANNELS]);

impl PidGoals {
    /// Encoded record size
    pub const FRAME_LEN: usize = PID_CHANNELS * 2;

    /// Encode the goals record
    pub fn encode(&self) -> Vec<u8> {
        self.0.iter().flat_map(|goal| goal.to_le_bytes()).collect()
    }

    /// Decode a goals record
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        expect_len("pid goals", data, Self::FRAME_LEN)?;
        let mut goals = [0u16; PID_CHANNELS];
        for (goal, chunk) in goals.iter_mut().zip(data.chunks_exact(2)) {
            *goal = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Ok(Self(goals))
    }
}
