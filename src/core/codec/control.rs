//! Actuator control protocol
//!
//! Command frame: `[action, ports, pwm]`, or `[action, ports]` when the PWM
//! is at maximum. The firmware treats a missing third byte as full power.
//!
//! Status frame: two bytes, little-endian.
//!
//! | bit         | meaning |
//! |-------------|---------|
//! | byte0 b0..4 | port1..port5 |
//! | byte0 b5    | inlet |
//! | byte0 b6    | outlet |
//! | byte0 b7    | pump 1 |
//! | byte1 b0    | pump 2 |

use super::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// PWM value that selects the short 2-byte command frame
pub const PUMP_MAX_PWM: u8 = 0xff;

/// Packed ports value addressing every port, inlet and outlet
pub const ALL_PORTS: u8 = 0xff;

const STOP: u8 = 0x21;
const INFLATION: u8 = 0x2b;
const VACUUM: u8 = 0x2d;
const RELEASE: u8 = 0x5e;
const INFLATION_HALF: u8 = 0x70;
const VACUUM_HALF: u8 = 0x6e;

/// Actuator action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// `!`
    Stop,
    /// `+`
    Inflate,
    /// `-`
    Vacuum,
    /// `^`
    Release,
    /// `p`
    InflateHalf,
    /// `n`
    VacuumHalf,
}

impl Action {
    /// Wire code
    pub const fn code(self) -> u8 {
        match self {
            Self::Stop => STOP,
            Self::Inflate => INFLATION,
            Self::Vacuum => VACUUM,
            Self::Release => RELEASE,
            Self::InflateHalf => INFLATION_HALF,
            Self::VacuumHalf => VACUUM_HALF,
        }
    }

    /// Decode a wire code
    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code {
            STOP => Ok(Self::Stop),
            INFLATION => Ok(Self::Inflate),
            VACUUM => Ok(Self::Vacuum),
            RELEASE => Ok(Self::Release),
            INFLATION_HALF => Ok(Self::InflateHalf),
            VACUUM_HALF => Ok(Self::VacuumHalf),
            _ => Err(DecodeError::UnknownCode { kind: "action", code }),
        }
    }

    /// Get all actions
    pub fn all() -> &'static [Action] {
        &[
            Self::Stop,
            Self::Inflate,
            Self::Vacuum,
            Self::Release,
            Self::InflateHalf,
            Self::VacuumHalf,
        ]
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stop => "stop",
            Self::Inflate => "inflate",
            Self::Vacuum => "vacuum",
            Self::Release => "release",
            Self::InflateHalf => "inflate-half",
            Self::VacuumHalf => "vacuum-half",
        };
        f.write_str(name)
    }
}

/// Unknown textual action
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown action: {0}")]
pub struct ParseActionError(String);

impl FromStr for Action {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inflate" => Ok(Self::Inflate),
            "vacuum" => Ok(Self::Vacuum),
            // Textual "stop" is sent as the release code; `Action::Stop` is only reachable by value.
            "release" | "stop" => Ok(Self::Release),
            "inflate-half" => Ok(Self::InflateHalf),
            "vacuum-half" => Ok(Self::VacuumHalf),
            other => Err(ParseActionError(other.to_string())),
        }
    }
}

/// Named port selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSet {
    /// Port 1
    pub port1: bool,
    /// Port 2
    pub port2: bool,
    /// Port 3
    pub port3: bool,
    /// Port 4
    pub port4: bool,
    /// Port 5
    pub port5: bool,
    /// Inlet valve
    pub inlet: bool,
    /// Outlet valve
    pub outlet: bool,
}

impl PortSet {
    /// No port selected
    pub fn none() -> Self {
        Self::default()
    }

    /// Every port, inlet and outlet
    pub fn all() -> Self {
        Self::from_bits(0x7f)
    }

    /// Select ports 1..=5 by number. Out-of-range numbers are ignored.
    pub fn ports(numbers: &[u8]) -> Self {
        let mut set = Self::none();
        for n in numbers {
            set.set_port(*n, true);
        }
        set
    }

    /// Set one of ports 1..=5
    pub fn set_port(&mut self, number: u8, on: bool) {
        match number {
            1 => self.port1 = on,
            2 => self.port2 = on,
            3 => self.port3 = on,
            4 => self.port4 = on,
            5 => self.port5 = on,
            _ => {}
        }
    }

    /// Pack into the wire bitmask
    pub fn bits(&self) -> u8 {
        u8::from(self.port1)
            | u8::from(self.port2) << 1
            | u8::from(self.port3) << 2
            | u8::from(self.port4) << 3
            | u8::from(self.port5) << 4
            | u8::from(self.inlet) << 5
            | u8::from(self.outlet) << 6
    }

    /// Unpack a wire bitmask. Bit 7 has no named port and is dropped.
    pub fn from_bits(bits: u8) -> Self {
        Self {
            port1: bits & 0x01 != 0,
            port2: bits & 0x02 != 0,
            port3: bits & 0x04 != 0,
            port4: bits & 0x08 != 0,
            port5: bits & 0x10 != 0,
            inlet: bits & 0x20 != 0,
            outlet: bits & 0x40 != 0,
        }
    }

    /// Check if nothing is selected
    pub fn is_empty(&self) -> bool {
        self.bits() == 0
    }
}

/// Port list parse error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown port: {0}")]
pub struct ParsePortsError(String);

impl FromStr for PortSet {
    type Err = ParsePortsError;

    /// Parse a comma separated list such as `1,3,inlet` or `all`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = Self::none();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match token.to_ascii_lowercase().as_str() {
                "all" => set = Self::all(),
                "inlet" => set.inlet = true,
                "outlet" => set.outlet = true,
                other => {
                    let number = other
                        .strip_prefix("port")
                        .unwrap_or(other)
                        .parse::<u8>()
                        .ok()
                        .filter(|n| (1..=5).contains(n))
                        .ok_or_else(|| ParsePortsError(token.to_string()))?;
                    set.set_port(number, true);
                }
            }
        }
        Ok(set)
    }
}

/// Port selection as named flags or as an already packed bitmask
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ports {
    /// Named flags
    Named(PortSet),
    /// Raw wire bitmask, sent unchanged
    Packed(u8),
}

impl Ports {
    /// Every port, as the packed `0xff` mask the firmware uses for "all"
    pub const ALL: Ports = Ports::Packed(ALL_PORTS);

    /// Wire byte
    pub fn code(&self) -> u8 {
        match self {
            Self::Named(set) => set.bits(),
            Self::Packed(bits) => *bits,
        }
    }
}

impl Default for Ports {
    fn default() -> Self {
        Self::Packed(0)
    }
}

// Two selections are equal when they produce the same wire byte.
impl PartialEq for Ports {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl Eq for Ports {}

impl From<PortSet> for Ports {
    fn from(set: PortSet) -> Self {
        Self::Named(set)
    }
}

impl From<u8> for Ports {
    fn from(bits: u8) -> Self {
        Self::Packed(bits)
    }
}

/// One actuator command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    /// What to do
    pub action: Action,
    /// Where
    pub ports: Ports,
    /// Pump drive, 0..=255
    pub pump_pwm: u8,
}

impl ControlCommand {
    /// Create a new command
    pub fn new(action: Action, ports: impl Into<Ports>, pump_pwm: u8) -> Self {
        Self {
            action,
            ports: ports.into(),
            pump_pwm,
        }
    }

    /// Same action and ports, different PWM
    pub fn with_pwm(&self, pump_pwm: u8) -> Self {
        Self { pump_pwm, ..*self }
    }

    /// Encode the command frame
    pub fn encode(&self) -> Vec<u8> {
        let action = self.action.code();
        let ports = self.ports.code();
        if self.pump_pwm == PUMP_MAX_PWM {
            vec![action, ports]
        } else {
            vec![action, ports, self.pump_pwm]
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ports=0x{:02x} pwm={}",
            self.action,
            self.ports.code(),
            self.pump_pwm
        )
    }
}

/// Decoded hardware status notification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareStatus {
    /// Little-endian `u16` of the frame as lowercase hex, for diagnostics
    pub raw: String,
    /// Pump 1 running
    pub pump1: bool,
    /// Pump 2 running
    pub pump2: bool,
    /// Inlet valve open
    pub inlet: bool,
    /// Outlet valve open
    pub outlet: bool,
    /// Port 1 open
    pub port1: bool,
    /// Port 2 open
    pub port2: bool,
    /// Port 3 open
    pub port3: bool,
    /// Port 4 open
    pub port4: bool,
    /// Port 5 open
    pub port5: bool,
    /// Any valve bit of the first byte set
    pub active: bool,
}

impl HardwareStatus {
    /// Frame length
    pub const FRAME_LEN: usize = 2;

    /// Decode a status frame. Trailing bytes are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let [byte0, byte1, ..] = *data else {
            return Err(DecodeError::InvalidLength {
                frame: "hardware status",
                expected: Self::FRAME_LEN,
                actual: data.len(),
            });
        };
        let ports = PortSet::from_bits(byte0);

        Ok(Self {
            raw: format!("{:x}", u16::from_le_bytes([byte0, byte1])),
            pump1: byte0 & 0x80 != 0,
            pump2: byte1 & 0x01 != 0,
            inlet: ports.inlet,
            outlet: ports.outlet,
            port1: ports.port1,
            port2: ports.port2,
            port3: ports.port3,
            port4: ports.port4,
            port5: ports.port5,
            active: byte0 != 0,
        })
    }

    /// Open valves as a port set
    pub fn ports(&self) -> PortSet {
        PortSet {
            port1: self.port1,
            port2: self.port2,
            port3: self.port3,
            port4: self.port4,
            port5: self.port5,
            inlet: self.inlet,
            outlet: self.outlet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_codes() {
        assert_eq!(Action::Stop.code(), 0x21);
        assert_eq!(Action::Inflate.code(), 0x2b);
        assert_eq!(Action::Vacuum.code(), 0x2d);
        assert_eq!(Action::Release.code(), 0x5e);
        assert_eq!(Action::InflateHalf.code(), 0x70);
        assert_eq!(Action::VacuumHalf.code(), 0x6e);

        for action in Action::all() {
            assert_eq!(Action::from_code(action.code()), Ok(*action));
        }
        assert!(Action::from_code(0x3f).is_err());
    }

    #[test]
    fn test_textual_stop_uses_release_code() {
        assert_eq!("stop".parse::<Action>().unwrap().code(), 0x5e);
        assert_eq!("release".parse::<Action>().unwrap().code(), 0x5e);
        assert_eq!("Inflate-Half".parse::<Action>(), Ok(Action::InflateHalf));
        assert!("pressure".parse::<Action>().is_err());
    }

    #[test]
    fn test_ports_bitmask() {
        assert_eq!(PortSet::ports(&[1]).bits(), 0x01);
        assert_eq!(PortSet::ports(&[5]).bits(), 0x10);
        let valves = PortSet {
            inlet: true,
            outlet: true,
            ..PortSet::none()
        };
        assert_eq!(valves.bits(), 0x60);
        assert_eq!(PortSet::all().bits(), 0x7f);

        for bits in 0..=0x7f_u8 {
            let set = PortSet::from_bits(bits);
            assert_eq!(PortSet::from_bits(set.bits()), set);
        }
    }

    #[test]
    fn test_packed_ports_pass_through() {
        assert_eq!(Ports::Packed(0xff).code(), 0xff);
        assert_eq!(Ports::Packed(0x80).code(), 0x80);
        assert_eq!(Ports::from(PortSet::ports(&[1, 2])), Ports::Packed(0x03));
    }

    #[test]
    fn test_parse_port_list() {
        let set: PortSet = "1, port3,inlet".parse().unwrap();
        assert_eq!(set.bits(), 0x01 | 0x04 | 0x20);
        assert_eq!("all".parse::<PortSet>().unwrap(), PortSet::all());
        assert!("6".parse::<PortSet>().is_err());
        assert!("valve".parse::<PortSet>().is_err());
    }

    #[test]
    fn test_command_frame_length() {
        let full = ControlCommand::new(Action::Inflate, PortSet::ports(&[1]), PUMP_MAX_PWM);
        assert_eq!(full.encode(), vec![0x2b, 0x01]);

        let partial = full.with_pwm(128);
        assert_eq!(partial.encode(), vec![0x2b, 0x01, 128]);

        for pwm in 0..PUMP_MAX_PWM {
            assert_eq!(full.with_pwm(pwm).encode().len(), 3);
        }
    }

    #[test]
    fn test_status_all_clear() {
        let status = HardwareStatus::decode(&[0x00, 0x00]).unwrap();
        assert!(!status.active);
        assert!(!status.pump1 && !status.pump2);
        assert!(!status.inlet && !status.outlet);
        assert!(status.ports().is_empty());
        assert_eq!(status.raw, "0");
    }

    #[test]
    fn test_status_port1() {
        let status = HardwareStatus::decode(&[0x01, 0x00]).unwrap();
        assert!(status.port1);
        assert!(status.active);
        assert!(!status.port2);
    }

    #[test]
    fn test_status_pumps() {
        let status = HardwareStatus::decode(&[0x80, 0x01]).unwrap();
        assert!(status.pump1);
        assert!(status.pump2);
        assert!(status.active);
        assert_eq!(status.raw, "180");

        let pump2_only = HardwareStatus::decode(&[0x00, 0x01]).unwrap();
        assert!(pump2_only.pump2);
        assert!(!pump2_only.active);
    }

    #[test]
    fn test_status_short_frame() {
        assert_eq!(
            HardwareStatus::decode(&[0x01]),
            Err(DecodeError::InvalidLength {
                frame: "hardware status",
                expected: 2,
                actual: 1
            })
        );
    }
}
