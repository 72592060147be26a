//! Physical constants of the arm.
//!
//! [`ArmGeometry`] is loaded once at startup (usually from the `[geometry]`
//! table of the CLI config), validated with [`ArmGeometry::validate`], and then
//! shared read-only by every component.  The defaults describe the reference
//! hardware: a 15 cm / 10 cm two-link arm on a 10 cm base with a 640x480
//! camera mounted 20 cm forward and 30 cm above the base.
//!
//! # Example
//!
//! ```rust
//! use armos_types::{ArmGeometry, JointId};
//!
//! let geometry = ArmGeometry::default();
//! geometry.validate().unwrap();
//! assert_eq!(geometry.index_of(JointId::Base), 5);
//! assert_eq!(geometry.home_base_angle(), 90.0);
//! ```

use serde::{Deserialize, Serialize};

use crate::{ArmError, ArmPoint, JointAngles, JointId, MAX_ANGLE, SERVO_COUNT};

/// Pinhole camera intrinsics, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self {
            fx: 650.0,
            fy: 650.0,
            cx: 320.0,
            cy: 240.0,
        }
    }
}

/// Base-servo sweep used while searching, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRange {
    pub min_deg: f64,
    pub max_deg: f64,
    pub step_deg: f64,
}

impl Default for SweepRange {
    fn default() -> Self {
        Self {
            min_deg: 45.0,
            max_deg: 135.0,
            step_deg: 0.5,
        }
    }
}

/// Servo index of every logical joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointMap {
    pub gripper: u8,
    pub wrist_rotate: u8,
    pub wrist: u8,
    pub elbow: u8,
    pub shoulder: u8,
    pub base: u8,
}

impl Default for JointMap {
    fn default() -> Self {
        Self {
            gripper: 0,
            wrist_rotate: 1,
            wrist: 2,
            elbow: 3,
            shoulder: 4,
            base: 5,
        }
    }
}

impl JointMap {
    pub fn index_of(&self, joint: JointId) -> u8 {
        match joint {
            JointId::Gripper => self.gripper,
            JointId::WristRotate => self.wrist_rotate,
            JointId::Wrist => self.wrist,
            JointId::Elbow => self.elbow,
            JointId::Shoulder => self.shoulder,
            JointId::Base => self.base,
        }
    }
}

/// Immutable physical configuration of the arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmGeometry {
    /// Shoulder-to-elbow link length (cm).
    pub l1_cm: f64,
    /// Elbow-to-wrist link length (cm).
    pub l2_cm: f64,
    /// Height of the shoulder axis above the base plane (cm).
    pub base_height_cm: f64,
    pub camera: CameraIntrinsics,
    /// Camera position in the arm frame; subtracted from camera-frame points.
    pub camera_mount_offset_cm: ArmPoint,
    /// Rest pose, indexed by servo index.
    pub home_pose: JointAngles,
    /// Pose of the non-base joints while sweeping.
    pub search_pose: JointAngles,
    pub gripper_open: u8,
    pub gripper_closed: u8,
    pub place_target_cm: ArmPoint,
    /// A range at or below this distance means the object is within grasp.
    pub grab_distance_cm: f32,
    pub sweep: SweepRange,
    pub servo_count: usize,
    pub joints: JointMap,
}

impl Default for ArmGeometry {
    fn default() -> Self {
        Self {
            l1_cm: 15.0,
            l2_cm: 10.0,
            base_height_cm: 10.0,
            camera: CameraIntrinsics::default(),
            camera_mount_offset_cm: ArmPoint::new(20.0, 0.0, 30.0),
            home_pose: JointAngles::from_trusted([90, 90, 90, 30, 150, 90]),
            search_pose: JointAngles::from_trusted([90; SERVO_COUNT]),
            gripper_open: 90,
            gripper_closed: 30,
            place_target_cm: ArmPoint::new(15.0, 0.0, 5.0),
            grab_distance_cm: 5.0,
            sweep: SweepRange::default(),
            servo_count: SERVO_COUNT,
            joints: JointMap::default(),
        }
    }
}

impl ArmGeometry {
    pub fn index_of(&self, joint: JointId) -> u8 {
        self.joints.index_of(joint)
    }

    /// Home angle of `joint`.
    pub fn home_angle(&self, joint: JointId) -> u8 {
        self.home_pose
            .get(self.index_of(joint) as usize)
            .unwrap_or(90)
    }

    /// Search-pose angle of `joint`.
    pub fn search_angle(&self, joint: JointId) -> u8 {
        self.search_pose
            .get(self.index_of(joint) as usize)
            .unwrap_or(90)
    }

    /// Where the sweep starts and restarts after a new command.
    pub fn home_base_angle(&self) -> f64 {
        f64::from(self.home_angle(JointId::Base))
    }

    /// Check every field for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::InvalidConfig`] describing the first violation.
    pub fn validate(&self) -> Result<(), ArmError> {
        fn fail(msg: impl Into<String>) -> Result<(), ArmError> {
            Err(ArmError::InvalidConfig(msg.into()))
        }

        if self.servo_count != SERVO_COUNT {
            return fail(format!(
                "servo_count must be {SERVO_COUNT}, got {}",
                self.servo_count
            ));
        }
        for (name, v) in [
            ("l1_cm", self.l1_cm),
            ("l2_cm", self.l2_cm),
            ("camera.fx", self.camera.fx),
            ("camera.fy", self.camera.fy),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return fail(format!("{name} must be a positive number, got {v}"));
            }
        }
        if !(self.base_height_cm.is_finite() && self.camera.cx.is_finite() && self.camera.cy.is_finite()) {
            return fail("base height and camera centre must be finite");
        }
        if !self.camera_mount_offset_cm.is_finite() || !self.place_target_cm.is_finite() {
            return fail("camera mount offset and place target must be finite");
        }
        if self.gripper_open > MAX_ANGLE || self.gripper_closed > MAX_ANGLE {
            return fail("gripper angles must lie in [0, 180]");
        }
        if !(self.grab_distance_cm.is_finite() && self.grab_distance_cm >= 0.0) {
            return fail("grab_distance_cm must be non-negative");
        }

        let s = &self.sweep;
        if !(s.step_deg.is_finite() && s.step_deg > 0.0) {
            return fail("sweep.step_deg must be positive");
        }
        if !(0.0 <= s.min_deg && s.min_deg < s.max_deg && s.max_deg <= f64::from(MAX_ANGLE)) {
            return fail(format!(
                "sweep range [{}, {}] must satisfy 0 <= min < max <= 180",
                s.min_deg, s.max_deg
            ));
        }

        let mut seen = [false; SERVO_COUNT];
        for joint in JointId::ALL {
            let index = self.index_of(joint) as usize;
            if index >= SERVO_COUNT {
                return fail(format!("{joint:?} maps to servo {index}, out of range"));
            }
            if seen[index] {
                return fail(format!("servo {index} is mapped to more than one joint"));
            }
            seen[index] = true;
        }
        Ok(())
    }
}
