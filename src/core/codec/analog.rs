//! Analog sampling protocol
//!
//! Requests are 1 or 2 bytes: a mode code, plus the averaging window for
//! continuous mode. Sample notifications are exactly 16 little-endian `u16`.

use super::{expect_len, DecodeError};
use serde::{Deserialize, Serialize};

/// Number of analog input channels
pub const ANALOG_CHANNELS: usize = 16;

/// Sample frame length in bytes
pub const ANALOG_FRAME_LEN: usize = ANALOG_CHANNELS * 2;

const STOP_CODE: u8 = 0x00;
const SINGLE_VALUE_CODE: u8 = 0x01;
const CONTINUOUS_VALUE_CODE: u8 = 0x02;

/// Sampling request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalogMode {
    /// Stop continuous sampling
    Stop,
    /// One frame
    Single,
    /// Stream frames, each averaged over `window` samples
    Continuous {
        /// Averaging window size in samples
        window: u8,
    },
}

impl AnalogMode {
    /// Encode the request frame
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Stop => vec![STOP_CODE],
            Self::Single => vec![SINGLE_VALUE_CODE],
            Self::Continuous { window } => vec![CONTINUOUS_VALUE_CODE, *window],
        }
    }
}

/// One frame of channel values, channel 1 first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalogSamples(pub [u16; ANALOG_CHANNELS]);

impl AnalogSamples {
    /// Decode a sample notification
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        expect_len("analog samples", data, ANALOG_FRAME_LEN)?;
        let mut values = [0u16; ANALOG_CHANNELS];
        for (value, chunk) in values.iter_mut().zip(data.chunks_exact(2)) {
            *value = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Ok(Self(values))
    }

    /// Channel values
    pub fn values(&self) -> &[u16; ANALOG_CHANNELS] {
        &self.0
    }

    /// Value of channel 1..=16
    pub fn channel(&self, number: usize) -> Option<u16> {
        number.checked_sub(1).and_then(|i| self.0.get(i).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_frames() {
        assert_eq!(AnalogMode::Stop.encode(), vec![0x00]);
        assert_eq!(AnalogMode::Single.encode(), vec![0x01]);
        assert_eq!(AnalogMode::Continuous { window: 20 }.encode(), vec![0x02, 20]);
    }

    #[test]
    fn test_decode_channel_order() {
        let mut frame = Vec::with_capacity(ANALOG_FRAME_LEN);
        for channel in 0..ANALOG_CHANNELS as u16 {
            frame.extend_from_slice(&(channel * 100 + 1).to_le_bytes());
        }

        let samples = AnalogSamples::decode(&frame).unwrap();
        assert_eq!(samples.values()[0], 1);
        assert_eq!(samples.values()[15], 1501);
        assert_eq!(samples.channel(1), Some(1));
        assert_eq!(samples.channel(16), Some(1501));
        assert_eq!(samples.channel(0), None);
        assert_eq!(samples.channel(17), None);
    }

    #[test]
    fn test_decode_little_endian() {
        let mut frame = [0u8; ANALOG_FRAME_LEN];
        frame[0] = 0x34;
        frame[1] = 0x12;
        assert_eq!(AnalogSamples::decode(&frame).unwrap().values()[0], 0x1234);
    }

    #[test]
    fn test_reject_wrong_length() {
        assert!(AnalogSamples::decode(&[0u8; 30]).is_err());
        assert!(AnalogSamples::decode(&[0u8; 34]).is_err());
        assert!(AnalogSamples::decode(&[]).is_err());
    }
}
