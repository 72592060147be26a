//! Wire format spoken with the actuator controller.
//!
//! Two request families share the `0xFF` header byte:
//!
//! * **Servo packet** (fire-and-forget): `[0xFF][index][angle][checksum]`
//!   with `checksum = (0xFF + index + angle) mod 256`.  No reply.
//! * **Framed requests** (acknowledged tooling): `[0xFF][cmd][payload..]`,
//!   answered by one text line.
//!
//! | cmd | payload | reply prefix |
//! |---|---|---|
//! | `0x01` | `index, angle` | `Executing: Servo` |
//! | `0x02` | – | `IR_READ:` |
//! | `0x03` | six angles | `All servos set:` |
//!
//! # Example
//!
//! ```rust
//! use armos_hal::protocol::ServoPacket;
//!
//! let packet = ServoPacket::new(2, 90).unwrap();
//! assert_eq!(packet.encode(), [0xFF, 2, 90, 0x5B]);
//! assert_eq!(ServoPacket::decode(&packet.encode()).unwrap(), packet);
//! ```

use armos_types::{ArmError, JointAngles, MAX_ANGLE, RangeReading, SERVO_COUNT};

pub const HEADER: u8 = 0xFF;
pub const CMD_SET_ANGLE: u8 = 0x01;
pub const CMD_READ_RANGE: u8 = 0x02;
pub const CMD_SET_ALL: u8 = 0x03;

pub const READY_LINE: &str = "Ready.";
pub const SET_ANGLE_ACK: &str = "Executing: Servo";
pub const SET_ALL_ACK: &str = "All servos set:";
pub const RANGE_PREFIX: &str = "IR_READ:";

/// Additive checksum over the first three bytes of a servo packet.
pub fn checksum(header: u8, index: u8, angle: u8) -> u8 {
    header.wrapping_add(index).wrapping_add(angle)
}

/// Validated single-servo command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoPacket {
    index: u8,
    angle: u8,
}

impl ServoPacket {
    /// # Errors
    ///
    /// Returns [`ArmError::InvalidServoCommand`] if `index >= SERVO_COUNT` or
    /// `angle > 180`.
    pub fn new(index: u8, angle: u8) -> Result<Self, ArmError> {
        if index as usize >= SERVO_COUNT || angle > MAX_ANGLE {
            return Err(ArmError::InvalidServoCommand { index, angle });
        }
        Ok(Self { index, angle })
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn angle(&self) -> u8 {
        self.angle
    }

    pub fn encode(&self) -> [u8; 4] {
        [
            HEADER,
            self.index,
            self.angle,
            checksum(HEADER, self.index, self.angle),
        ]
    }

    /// Parse and verify a 4-byte packet.
    ///
    /// # Errors
    ///
    /// * [`ArmError::ProtocolMismatch`] for a wrong header byte.
    /// * [`ArmError::ChecksumMismatch`] if the checksum does not match.
    /// * [`ArmError::InvalidServoCommand`] for an out-of-range index or angle.
    pub fn decode(bytes: &[u8; 4]) -> Result<Self, ArmError> {
        let [header, index, angle, received] = *bytes;
        if header != HEADER {
            return Err(ArmError::ProtocolMismatch {
                expected: format!("{HEADER:#04x}"),
                received: format!("{header:#04x}"),
            });
        }
        let expected = checksum(header, index, angle);
        if expected != received {
            return Err(ArmError::ChecksumMismatch {
                expected,
                actual: received,
            });
        }
        Self::new(index, angle)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Framed requests
// ────────────────────────────────────────────────────────────────────────────

pub fn set_angle_request(packet: ServoPacket) -> [u8; 4] {
    [HEADER, CMD_SET_ANGLE, packet.index, packet.angle]
}

pub fn read_range_request() -> [u8; 2] {
    [HEADER, CMD_READ_RANGE]
}

pub fn set_all_request(angles: &JointAngles) -> [u8; 2 + SERVO_COUNT] {
    let mut frame = [0u8; 2 + SERVO_COUNT];
    frame[0] = HEADER;
    frame[1] = CMD_SET_ALL;
    frame[2..].copy_from_slice(angles.as_array());
    frame
}

/// Parse an `IR_READ:<value>` line.
///
/// Returns `None` for lines that are not range replies (startup noise).  A
/// malformed value yields [`RangeReading::FAULT`].
pub fn parse_range_reply(line: &str) -> Option<RangeReading> {
    let value = line.trim().strip_prefix(RANGE_PREFIX)?;
    Some(
        value
            .trim()
            .parse::<f32>()
            .map(RangeReading)
            .unwrap_or(RangeReading::FAULT),
    )
}
