//! Inverse kinematics for the base/shoulder/elbow linkage.
//!
//! The arm is a base rotation around the vertical axis plus a planar two-link
//! chain (`L1` shoulder→elbow, `L2` elbow→wrist) whose shoulder axis sits
//! `base_height` above the base plane.
//!
//! Angle conventions, all in degrees and clipped to `[0, 180]`:
//!
//! * **base** – `atan2(y, x)`: +X is 0°, +Y is 90°.
//! * **shoulder** – elevation of `L1` above the horizontal.
//! * **elbow** – bend between the links: 0° straight, 180° fully folded.
//!
//! # Example
//!
//! ```rust
//! use armos_perception::kinematics::IkSolver;
//! use armos_types::ArmPoint;
//!
//! let ik = IkSolver::new(15.0, 10.0, 10.0);
//! let joints = ik.solve(ArmPoint::new(15.0, 0.0, 5.0)).unwrap();
//! assert_eq!((joints.base, joints.shoulder, joints.elbow), (0, 19, 104));
//! ```

use armos_types::{ArmError, ArmGeometry, ArmPoint};
use tracing::debug;

/// Integer joint angles ready for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JointSolution {
    pub base: u8,
    pub shoulder: u8,
    pub elbow: u8,
}

/// Clipped but untruncated joint angles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExactSolution {
    pub base: f64,
    pub shoulder: f64,
    pub elbow: f64,
}

/// Closed-form solver for a fixed geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IkSolver {
    l1: f64,
    l2: f64,
    base_height: f64,
}

impl IkSolver {
    pub fn new(l1: f64, l2: f64, base_height: f64) -> Self {
        Self {
            l1,
            l2,
            base_height,
        }
    }

    pub fn from_geometry(geometry: &ArmGeometry) -> Self {
        Self::new(geometry.l1_cm, geometry.l2_cm, geometry.base_height_cm)
    }

    /// Largest reachable distance from the shoulder axis.
    pub fn max_reach(&self) -> f64 {
        self.l1 + self.l2
    }

    /// Smallest reachable distance from the shoulder axis.
    pub fn min_reach(&self) -> f64 {
        (self.l1 - self.l2).abs()
    }

    /// Solve for `target` and truncate to integer degrees.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Unreachable`] when the target lies outside the
    /// annulus `[|L1-L2|, L1+L2]` around the shoulder axis or any
    /// intermediate value is not finite.
    pub fn solve(&self, target: ArmPoint) -> Result<JointSolution, ArmError> {
        let exact = self.solve_exact(target)?;
        Ok(JointSolution {
            base: exact.base as u8,
            shoulder: exact.shoulder as u8,
            elbow: exact.elbow as u8,
        })
    }

    /// Solve for `target` without truncation.
    ///
    /// # Errors
    ///
    /// Same as [`solve`](Self::solve).
    pub fn solve_exact(&self, target: ArmPoint) -> Result<ExactSolution, ArmError> {
        let unreachable = || {
            debug!(x = target.x, y = target.y, z = target.z, "target unreachable");
            ArmError::Unreachable {
                x: target.x,
                y: target.y,
                z: target.z,
            }
        };

        let ArmPoint { x, y, z } = target;
        let (l1, l2) = (self.l1, self.l2);

        let base = y.atan2(x).to_degrees();

        let r = x.hypot(y);
        let z_rel = z - self.base_height;
        let d_sq = r * r + z_rel * z_rel;
        let d = d_sq.sqrt();

        if !d.is_finite() || d > self.max_reach() || d < self.min_reach() {
            return Err(unreachable());
        }

        let cos_phi = ((l1 * l1 + l2 * l2 - d_sq) / (2.0 * l1 * l2)).clamp(-1.0, 1.0);
        let elbow = 180.0 - cos_phi.acos().to_degrees();

        let alpha = z_rel.atan2(r);
        let cos_beta = ((l1 * l1 + d_sq - l2 * l2) / (2.0 * l1 * d)).clamp(-1.0, 1.0);
        let shoulder = (alpha + cos_beta.acos()).to_degrees();

        if !(base.is_finite() && shoulder.is_finite() && elbow.is_finite()) {
            return Err(unreachable());
        }

        Ok(ExactSolution {
            base: base.clamp(0.0, 180.0),
            shoulder: shoulder.clamp(0.0, 180.0),
            elbow: elbow.clamp(0.0, 180.0),
        })
    }

    /// Wrist position for the given joint angles (degrees).
    ///
    /// Inverse of [`solve_exact`](Self::solve_exact) for angles that were not
    /// clipped.
    pub fn forward(&self, base: f64, shoulder: f64, elbow: f64) -> ArmPoint {
        let shoulder = shoulder.to_radians();
        let forearm = shoulder - elbow.to_radians();

        let r = self.l1 * shoulder.cos() + self.l2 * forearm.cos();
        let z_rel = self.l1 * shoulder.sin() + self.l2 * forearm.sin();

        let base = base.to_radians();
        ArmPoint::new(r * base.cos(), r * base.sin(), z_rel + self.base_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> IkSolver {
        IkSolver::new(15.0, 10.0, 10.0)
    }

    fn assert_close(a: ArmPoint, b: ArmPoint) {
        assert!(a.distance(b) < 1e-6, "{a:?} != {b:?}");
    }

    #[test]
    fn worked_example() {
        let j = reference().solve(ArmPoint::new(15.0, 0.0, 5.0)).unwrap();
        assert_eq!(j, JointSolution { base: 0, shoulder: 19, elbow: 104 });
    }

    #[test]
    fn envelope_boundaries_are_inclusive() {
        let ik = reference();
        assert!(ik.solve(ArmPoint::new(25.0, 0.0, 10.0)).is_ok());
        assert!(ik.solve(ArmPoint::new(5.0, 0.0, 10.0)).is_ok());
        assert!(matches!(
            ik.solve(ArmPoint::new(26.0, 0.0, 10.0)),
            Err(ArmError::Unreachable { .. })
        ));
        assert!(ik.solve(ArmPoint::new(4.0, 0.0, 10.0)).is_err());
    }

    #[test]
    fn fully_extended_and_folded_angles() {
        let ik = reference();
        let straight = ik.solve_exact(ArmPoint::new(25.0, 0.0, 10.0)).unwrap();
        assert!(straight.elbow.abs() < 1e-6);
        assert!(straight.shoulder.abs() < 1e-6);

        let folded = ik.solve_exact(ArmPoint::new(5.0, 0.0, 10.0)).unwrap();
        assert!((folded.elbow - 180.0).abs() < 1e-6);
    }

    #[test]
    fn base_angle_follows_atan2() {
        let ik = reference();
        let left = ik.solve(ArmPoint::new(0.0, 15.0, 10.0)).unwrap();
        assert_eq!(left.base, 90);
        let diagonal = ik.solve_exact(ArmPoint::new(10.0, 10.0, 10.0)).unwrap();
        assert!((diagonal.base - 45.0).abs() < 1e-9);
    }

    #[test]
    fn forward_reproduces_in_envelope_points() {
        let ik = reference();
        for target in [
            ArmPoint::new(15.0, 0.0, 5.0),
            ArmPoint::new(12.0, 9.0, 14.0),
            ArmPoint::new(0.0, 18.0, 2.0),
            ArmPoint::new(7.0, 3.0, 20.0),
        ] {
            let s = ik.solve_exact(target).unwrap();
            for angle in [s.base, s.shoulder, s.elbow] {
                assert!((0.0..=180.0).contains(&angle));
            }
            assert_close(ik.forward(s.base, s.shoulder, s.elbow), target);
        }
    }

    #[test]
    fn degenerate_equal_links_at_shoulder_is_unreachable() {
        let ik = IkSolver::new(10.0, 10.0, 10.0);
        assert!(ik.solve(ArmPoint::new(0.0, 0.0, 10.0)).is_err());
    }

    #[test]
    fn non_finite_target_is_unreachable() {
        let ik = reference();
        assert!(ik.solve(ArmPoint::new(f64::NAN, 0.0, 5.0)).is_err());
        assert!(ik.solve(ArmPoint::new(f64::INFINITY, 0.0, 5.0)).is_err());
    }
}
