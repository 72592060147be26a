//! Pixel + range → arm-frame point.
//!
//! Pinhole back-projection followed by a fixed translation from the camera
//! origin to the arm base.  Camera rotation is not modelled: the camera axes
//! are assumed parallel to the arm axes.
//!
//! # Example
//!
//! ```rust
//! use armos_perception::transform::CameraModel;
//! use armos_types::ArmGeometry;
//!
//! let camera = CameraModel::from_geometry(&ArmGeometry::default());
//! // Principal point at 20 cm: straight ahead of the lens.
//! let p = camera.pixel_to_arm(320.0, 240.0, 20.0);
//! assert_eq!((p.x, p.y, p.z), (-20.0, 0.0, -10.0));
//! ```

use armos_types::{ArmGeometry, ArmPoint, CameraIntrinsics};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    intrinsics: CameraIntrinsics,
    mount_offset: ArmPoint,
}

impl CameraModel {
    pub fn new(intrinsics: CameraIntrinsics, mount_offset: ArmPoint) -> Self {
        Self {
            intrinsics,
            mount_offset,
        }
    }

    pub fn from_geometry(geometry: &ArmGeometry) -> Self {
        Self::new(geometry.camera, geometry.camera_mount_offset_cm)
    }

    /// Back-project pixel `(px, py)` observed at `distance_cm` along the
    /// optical axis.
    ///
    /// Non-finite input yields a non-finite point; the solver rejects it.
    pub fn pixel_to_arm(&self, px: f64, py: f64, distance_cm: f64) -> ArmPoint {
        let CameraIntrinsics { fx, fy, cx, cy } = self.intrinsics;
        let z_cam = distance_cm;
        let x_cam = (px - cx) * z_cam / fx;
        let y_cam = (py - cy) * z_cam / fy;
        ArmPoint::new(x_cam, y_cam, z_cam) - self.mount_offset
    }
}

/// One-shot form of [`CameraModel::pixel_to_arm`].
pub fn transform(px: f64, py: f64, distance_cm: f64, geometry: &ArmGeometry) -> ArmPoint {
    CameraModel::from_geometry(geometry).pixel_to_arm(px, py, distance_cm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_centre_pixel_scales_with_distance() {
        let g = ArmGeometry::default();
        let near = transform(385.0, 240.0, 10.0, &g);
        let far = transform(385.0, 240.0, 20.0, &g);
        // 65 px at f = 650 px is 0.1 cm per cm of depth.
        assert!((near.x - (1.0 - 20.0)).abs() < 1e-9);
        assert!((far.x - (2.0 - 20.0)).abs() < 1e-9);
        assert_eq!(near.y, 0.0);
    }

    #[test]
    fn mount_offset_is_subtracted() {
        let model = CameraModel::new(
            CameraIntrinsics { fx: 100.0, fy: 200.0, cx: 50.0, cy: 50.0 },
            ArmPoint::new(1.0, 2.0, 3.0),
        );
        let p = model.pixel_to_arm(150.0, 250.0, 10.0);
        assert_eq!(p, ArmPoint::new(10.0 - 1.0, 10.0 - 2.0, 10.0 - 3.0));
    }

    #[test]
    fn non_finite_propagates() {
        let g = ArmGeometry::default();
        assert!(!transform(320.0, 240.0, f64::NAN, &g).is_finite());
        assert!(!transform(f64::INFINITY, 240.0, 10.0, &g).is_finite());
    }
}
