//! `armos-types` – shared vocabulary of the ArmOS workspace.
//!
//! Every crate speaks in these types: the executor's [`Task`], the accepted
//! [`Command`] carried by the task channel, the raw [`CommandMessage`] schema
//! produced by the intent source, joint-space and Cartesian values, sensor
//! samples, the immutable [`ArmGeometry`], and the single [`ArmError`]
//! taxonomy.

pub mod geometry;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use geometry::{ArmGeometry, CameraIntrinsics, JointMap, SweepRange};

/// Number of servos driven by the actuator controller.
pub const SERVO_COUNT: usize = 6;

/// Largest angle a servo accepts, in degrees.
pub const MAX_ANGLE: u8 = 180;

// ─────────────────────────────────────────────────────────────────────────────
// Joint space
// ─────────────────────────────────────────────────────────────────────────────

/// Logical joints of the arm.  The servo index of each joint is resolved
/// through [`JointMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointId {
    Gripper,
    WristRotate,
    Wrist,
    Elbow,
    Shoulder,
    Base,
}

impl JointId {
    pub const ALL: [JointId; SERVO_COUNT] = [
        JointId::Gripper,
        JointId::WristRotate,
        JointId::Wrist,
        JointId::Elbow,
        JointId::Shoulder,
        JointId::Base,
    ];
}

/// One angle per servo, indexed by servo index.
///
/// Construction rejects any value above [`MAX_ANGLE`], so a `JointAngles`
/// can always be sent without further range checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct JointAngles([u8; SERVO_COUNT]);

impl JointAngles {
    /// Build from six angles in servo-index order.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::InvalidServoCommand`] for the first angle above
    /// [`MAX_ANGLE`].
    pub fn new(angles: [u8; SERVO_COUNT]) -> Result<Self, ArmError> {
        for (index, &angle) in angles.iter().enumerate() {
            if angle > MAX_ANGLE {
                return Err(ArmError::InvalidServoCommand {
                    index: index as u8,
                    angle,
                });
            }
        }
        Ok(Self(angles))
    }

    /// For literal poses known to be in range.
    pub(crate) const fn from_trusted(angles: [u8; SERVO_COUNT]) -> Self {
        Self(angles)
    }

    /// Every servo at the same angle.
    pub fn uniform(angle: u8) -> Result<Self, ArmError> {
        Self::new([angle; SERVO_COUNT])
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied()
    }

    /// Replace the angle of one servo.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::InvalidServoCommand`] if `index` is out of range or
    /// `angle` exceeds [`MAX_ANGLE`].
    pub fn set(&mut self, index: usize, angle: u8) -> Result<(), ArmError> {
        if index >= SERVO_COUNT || angle > MAX_ANGLE {
            return Err(ArmError::InvalidServoCommand {
                index: index.min(u8::MAX as usize) as u8,
                angle,
            });
        }
        self.0[index] = angle;
        Ok(())
    }

    pub fn as_array(&self) -> &[u8; SERVO_COUNT] {
        &self.0
    }

    /// `(servo index, angle)` pairs in servo order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.0.iter().enumerate().map(|(i, &a)| (i as u8, a))
    }
}

impl TryFrom<Vec<u8>> for JointAngles {
    type Error = ArmError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let angles: [u8; SERVO_COUNT] = value.try_into().map_err(|v: Vec<u8>| {
            ArmError::InvalidConfig(format!(
                "expected {SERVO_COUNT} joint angles, got {}",
                v.len()
            ))
        })?;
        Self::new(angles)
    }
}

impl From<JointAngles> for Vec<u8> {
    fn from(value: JointAngles) -> Self {
        value.0.to_vec()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cartesian space & sensing
// ─────────────────────────────────────────────────────────────────────────────

/// A point in the arm's base frame, in centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl ArmPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Euclidean distance to `other`.
    pub fn distance(self, other: Self) -> f64 {
        let d = self - other;
        (d.x * d.x + d.y * d.y + d.z * d.z).sqrt()
    }
}

impl std::ops::Sub for ArmPoint {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// One object detection produced by the vision collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    /// Pixel column of the bounding-box centre.
    pub center_x: f64,
    /// Pixel row of the bounding-box centre.
    pub center_y: f64,
    pub label: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Distance reported by the range sensor, in centimetres.
///
/// Any negative (or non-finite) value is the fault sentinel: "no valid
/// reading this tick".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeReading(pub f32);

impl RangeReading {
    /// The canonical fault sentinel.
    pub const FAULT: RangeReading = RangeReading(-1.0);

    pub fn is_valid(&self) -> bool {
        self.0.is_finite() && self.0 >= 0.0
    }

    /// The distance in centimetres, or `None` for the fault sentinel.
    pub fn cm(&self) -> Option<f32> {
        self.is_valid().then_some(self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tasks & commands
// ─────────────────────────────────────────────────────────────────────────────

/// The executor's current activity.  Exactly one is active per tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Idle,
    Search { target: String },
    Pickup { target: String },
    Grab { target: String },
    Lift,
    IdleHolding,
    Place,
    Stop,
}

impl Task {
    /// Short upper-case name used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Task::Idle => "IDLE",
            Task::Search { .. } => "SEARCH",
            Task::Pickup { .. } => "PICKUP",
            Task::Grab { .. } => "GRAB",
            Task::Lift => "LIFT",
            Task::IdleHolding => "IDLE_HOLDING",
            Task::Place => "PLACE",
            Task::Stop => "STOP",
        }
    }
}

/// A validated intent, ready to be delivered over the task channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pickup { target: String },
    Place { location: Option<String> },
    Stop,
}

impl From<Command> for Task {
    fn from(command: Command) -> Self {
        match command {
            Command::Pickup { target } => Task::Pickup { target },
            Command::Place { .. } => Task::Place,
            Command::Stop => Task::Stop,
        }
    }
}

/// Raw command object emitted by the intent source, e.g.
/// `{"command": "PICKUP", "target": "apple"}`.
///
/// Unknown `command` values deserialize to [`CommandMessage::Unknown`] so the
/// channel boundary can reject them with a typed error instead of a parse
/// failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "command", rename_all = "UPPERCASE")]
pub enum CommandMessage {
    /// Search for and pick up the named object.
    Pickup {
        #[serde(default)]
        target: Option<String>,
    },
    /// Put the held object down.
    Place {
        #[serde(default)]
        location: Option<String>,
    },
    /// Return to the home pose.
    Stop,
    /// The request could not be understood.
    Invalid,
    #[serde(other)]
    #[schemars(skip)]
    Unknown,
}

impl TryFrom<CommandMessage> for Command {
    type Error = ArmError;

    fn try_from(message: CommandMessage) -> Result<Self, Self::Error> {
        match message {
            CommandMessage::Pickup { target } => match target {
                Some(t) if !t.trim().is_empty() => Ok(Command::Pickup {
                    target: t.trim().to_string(),
                }),
                _ => Err(ArmError::InvalidCommand(
                    "PICKUP requires a non-empty target".to_string(),
                )),
            },
            CommandMessage::Place { location } => Ok(Command::Place { location }),
            CommandMessage::Stop => Ok(Command::Stop),
            CommandMessage::Invalid => {
                Err(ArmError::InvalidCommand("intent source returned INVALID".to_string()))
            }
            CommandMessage::Unknown => {
                Err(ArmError::InvalidCommand("unrecognized command".to_string()))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error taxonomy shared by every ArmOS crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArmError {
    #[error("Sensor fault: {0}")]
    SensorFault(String),

    #[error("Target '{0}' not found")]
    PerceptionMiss(String),

    #[error("Point ({x:.2}, {y:.2}, {z:.2}) is outside the reachable envelope")]
    Unreachable { x: f64, y: f64, z: f64 },

    #[error("Actuator link is not connected")]
    LinkNotConnected,

    #[error("Protocol mismatch: expected '{expected}', got '{received}'")]
    ProtocolMismatch { expected: String, received: String },

    #[error("Controller did not report ready within {timeout_ms} ms")]
    HandshakeTimeout { timeout_ms: u64 },

    #[error("Invalid servo command: index {index}, angle {angle}")]
    InvalidServoCommand { index: u8, angle: u8 },

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Task channel closed")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Intent parser error: {0}")]
    Llm(String),
}

impl ArmError {
    /// Failures that cost at most one control cycle and are only logged.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            ArmError::SensorFault(_)
                | ArmError::PerceptionMiss(_)
                | ArmError::Unreachable { .. }
                | ArmError::ProtocolMismatch { .. }
        )
    }
}

impl From<std::io::Error> for ArmError {
    fn from(e: std::io::Error) -> Self {
        ArmError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_points_subtract_componentwise() {
        let d = ArmPoint::new(10.0, 4.0, -1.0) - ArmPoint::new(7.0, 0.0, 3.0);
        assert_eq!(d, ArmPoint::new(3.0, 4.0, -4.0));
        assert_eq!(ArmPoint::new(3.0, 4.0, 0.0).distance(ArmPoint::new(0.0, 0.0, 0.0)), 5.0);
    }

    #[test]
    fn joint_angles_reject_out_of_range() {
        let err = JointAngles::new([90, 90, 181, 90, 90, 90]).unwrap_err();
        assert_eq!(err, ArmError::InvalidServoCommand { index: 2, angle: 181 });
    }

    #[test]
    fn joint_angles_set_validates_index_and_angle() {
        let mut angles = JointAngles::uniform(90).unwrap();
        angles.set(5, 45).unwrap();
        assert_eq!(angles.get(5), Some(45));
        assert!(angles.set(6, 10).is_err());
        assert!(angles.set(0, 200).is_err());
        assert_eq!(angles.get(0), Some(90));
    }

    #[test]
    fn joint_angles_deserialize_checks_length() {
        let ok: JointAngles = serde_json::from_str("[90,90,90,30,150,90]").unwrap();
        assert_eq!(ok.get(4), Some(150));
        assert!(serde_json::from_str::<JointAngles>("[90,90,90]").is_err());
        assert!(serde_json::from_str::<JointAngles>("[90,90,90,30,150,250]").is_err());
    }

    #[test]
    fn range_reading_fault_sentinel() {
        assert!(!RangeReading::FAULT.is_valid());
        assert_eq!(RangeReading(-0.5).cm(), None);
        assert_eq!(RangeReading(f32::NAN).cm(), None);
        assert_eq!(RangeReading(0.0).cm(), Some(0.0));
        assert_eq!(RangeReading(12.5).cm(), Some(12.5));
    }

    #[test]
    fn command_message_pickup_parses() {
        let msg: CommandMessage =
            serde_json::from_str(r#"{"command": "PICKUP", "target": "apple"}"#).unwrap();
        assert_eq!(
            Command::try_from(msg).unwrap(),
            Command::Pickup { target: "apple".to_string() }
        );
    }

    #[test]
    fn command_message_place_location_is_optional() {
        let msg: CommandMessage = serde_json::from_str(r#"{"command": "PLACE"}"#).unwrap();
        assert_eq!(msg, CommandMessage::Place { location: None });
        let msg: CommandMessage =
            serde_json::from_str(r#"{"command": "PLACE", "location": "table"}"#).unwrap();
        assert_eq!(
            Command::try_from(msg).unwrap(),
            Command::Place { location: Some("table".to_string()) }
        );
    }

    #[test]
    fn invalid_and_unknown_commands_are_rejected() {
        let invalid: CommandMessage = serde_json::from_str(r#"{"command": "INVALID"}"#).unwrap();
        assert!(matches!(
            Command::try_from(invalid),
            Err(ArmError::InvalidCommand(_))
        ));

        let unknown: CommandMessage = serde_json::from_str(r#"{"command": "DANCE"}"#).unwrap();
        assert_eq!(unknown, CommandMessage::Unknown);
        assert!(Command::try_from(unknown).is_err());
    }

    #[test]
    fn pickup_without_target_is_rejected() {
        let blank: CommandMessage =
            serde_json::from_str(r#"{"command": "PICKUP", "target": "  "}"#).unwrap();
        assert!(Command::try_from(blank).is_err());
        let missing: CommandMessage = serde_json::from_str(r#"{"command": "PICKUP"}"#).unwrap();
        assert!(Command::try_from(missing).is_err());
    }

    #[test]
    fn command_maps_to_task() {
        assert_eq!(
            Task::from(Command::Pickup { target: "cup".into() }),
            Task::Pickup { target: "cup".into() }
        );
        assert_eq!(Task::from(Command::Place { location: None }), Task::Place);
        assert_eq!(Task::from(Command::Stop), Task::Stop);
    }

    #[test]
    fn detection_uses_camel_case_fields() {
        let det: Detection = serde_json::from_str(
            r#"{"centerX": 320.0, "centerY": 200.5, "label": "apple", "confidence": 0.9}"#,
        )
        .unwrap();
        assert_eq!(det.label, "apple");
        assert!((det.center_y - 200.5).abs() < 1e-9);
    }

    #[test]
    fn arm_error_display_and_classification() {
        let err = ArmError::Unreachable { x: 30.0, y: 0.0, z: 10.0 };
        assert!(err.to_string().contains("reachable envelope"));
        assert!(err.is_soft());
        assert!(!ArmError::LinkNotConnected.is_soft());
        assert!(
            ArmError::HandshakeTimeout { timeout_ms: 15_000 }
                .to_string()
                .contains("15000")
        );
    }
}
