//! `armos-hal` – Hardware Abstraction Layer.
//!
//! Everything that touches the physical world sits behind one capability
//! trait per collaborator, so the control loop never knows whether it is
//! driving a real arm or a simulation.
//!
//! # Modules
//!
//! - [`transport`] – [`Transport`][transport::Transport] byte stream with a
//!   UART implementation and an in-memory mock.
//! - [`protocol`] – checksummed servo packets and the framed request/reply
//!   vocabulary of the actuator controller.
//! - [`link`] – [`ActuatorLink`][link::ActuatorLink] (fire-and-forget and
//!   acknowledged variants), the shared transport guard and the startup
//!   handshake.
//! - [`range`] – [`RangeSensor`][range::RangeSensor] (controller-backed or
//!   UDP feed), the lock-free [`RangeCell`][range::RangeCell] and its
//!   background poller.
//! - [`perception`] – [`PerceptionSource`][perception::PerceptionSource] and
//!   the UDP detection feed.
//! - [`sim`] – recording/scripted doubles of all three capabilities.

pub mod link;
pub mod perception;
pub mod protocol;
pub mod range;
pub mod sim;
pub mod transport;

pub use link::{AcknowledgedLink, ActuatorLink, FireAndForgetLink, SharedTransport};
pub use perception::{PerceptionSource, UdpDetectionFeed};
pub use range::{LinkRangeSensor, RangeCell, RangePoller, RangeSensor, UdpRangeFeed};
pub use transport::{MockTransport, SerialTransport, Transport};
