//! `armos-perception` – from what the camera sees to where the joints go.
//!
//! Pure functions only: nothing here performs I/O or keeps state between
//! calls.
//!
//! # Modules
//!
//! - [`transform`] – [`CameraModel`][transform::CameraModel]: pinhole
//!   back-projection of a detection centre plus range into the arm frame.
//! - [`kinematics`] – [`IkSolver`][kinematics::IkSolver]: closed-form inverse
//!   kinematics (and its forward companion) for the base/shoulder/elbow chain.
//! - [`detection`] – picks the detection that matches the requested target.

pub mod detection;
pub mod kinematics;
pub mod transform;

pub use detection::select_target;
pub use kinematics::{ExactSolution, IkSolver, JointSolution};
pub use transform::CameraModel;
