//! Standard battery level characteristic (0x2A19)

use super::{first_byte, DecodeError};

/// Battery charge, percent
pub type BatteryLevel = u8;

/// Decode a battery level payload
pub fn decode(data: &[u8]) -> Result<BatteryLevel, DecodeError> {
    first_byte("battery level", data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        assert_eq!(decode(&[87]), Ok(87));
        assert!(decode(&[]).is_err());
    }
}
