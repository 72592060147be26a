//! `ActuatorLink` – the capability of moving servos.
//!
//! Two interchangeable implementations share one [`SharedTransport`]:
//!
//! * [`FireAndForgetLink`] writes checksummed 4-byte servo packets and never
//!   reads.  This is what the reflex loop uses at full cadence.
//! * [`AcknowledgedLink`] writes framed requests and waits (bounded) for the
//!   controller's reply line.  A missing or unexpected reply is a soft
//!   [`ArmError::ProtocolMismatch`].
//!
//! Every request/response exchange goes through [`SharedTransport::exchange`],
//! so a range read and a servo write can never interleave on the wire.
//!
//! # Example
//!
//! ```rust
//! use armos_hal::link::{ActuatorLink, FireAndForgetLink, SharedTransport};
//! use armos_hal::transport::MockTransport;
//!
//! let wire = MockTransport::new();
//! let mut link = FireAndForgetLink::new(SharedTransport::new(wire.clone()));
//! link.send(2, 90).unwrap();
//! assert_eq!(wire.written(), vec![0xFF, 2, 90, 0x5B]);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use armos_types::{ArmError, JointAngles};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::protocol::{
    self, READY_LINE, SET_ALL_ACK, SET_ANGLE_ACK, ServoPacket, set_all_request, set_angle_request,
};
use crate::transport::{Transport, read_line};

/// Default bound on how long an acknowledged request waits for its reply.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(1);

// ────────────────────────────────────────────────────────────────────────────
// Shared transport guard
// ────────────────────────────────────────────────────────────────────────────

/// A transport behind one serializing lock.  Cloning shares the same port.
///
/// After [`close`](Self::close) every exchange fails with
/// [`ArmError::LinkNotConnected`].
#[derive(Clone)]
pub struct SharedTransport {
    inner: Arc<Mutex<Option<Box<dyn Transport>>>>,
}

impl SharedTransport {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(transport)))),
        }
    }

    /// Run one exchange while holding the lock.
    pub fn exchange<R>(
        &self,
        f: impl FnOnce(&mut dyn Transport) -> Result<R, ArmError>,
    ) -> Result<R, ArmError> {
        let mut guard = self.inner.lock();
        match guard.as_mut() {
            Some(transport) => f(transport.as_mut()),
            None => Err(ArmError::LinkNotConnected),
        }
    }

    /// Release the underlying port.
    pub fn close(&self) {
        if self.inner.lock().take().is_some() {
            info!("transport closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().is_some()
    }
}

/// Wait for the controller to announce itself.
///
/// Sleeps `settle` (the controller resets when the port opens), drops any
/// bytes received so far, then reads lines until one contains `Ready.` or
/// `ready_timeout` elapses.
///
/// # Errors
///
/// * [`ArmError::HandshakeTimeout`] if `Ready.` never arrives.
/// * Transport errors are propagated unchanged.
pub fn handshake(
    transport: &SharedTransport,
    settle: Duration,
    ready_timeout: Duration,
) -> Result<(), ArmError> {
    info!(settle_ms = settle.as_millis() as u64, "waiting for controller reset");
    std::thread::sleep(settle);

    transport.exchange(|t| {
        t.discard_input()?;
        let deadline = Instant::now() + ready_timeout;
        while Instant::now() < deadline {
            let line_deadline = (Instant::now() + Duration::from_millis(500)).min(deadline);
            match read_line(t, line_deadline)? {
                Some(line) if line.contains(READY_LINE) => {
                    info!("controller ready");
                    return Ok(());
                }
                Some(line) => debug!(%line, "handshake noise"),
                None => {}
            }
        }
        Err(ArmError::HandshakeTimeout {
            timeout_ms: ready_timeout.as_millis() as u64,
        })
    })
}

// ────────────────────────────────────────────────────────────────────────────
// ActuatorLink trait
// ────────────────────────────────────────────────────────────────────────────

/// Moves servos on the actuator controller.
pub trait ActuatorLink: Send {
    /// Stable identifier, e.g. `"serial"` or `"sim"`.
    fn id(&self) -> &str;

    /// Move servo `index` to `angle` degrees.
    ///
    /// # Errors
    ///
    /// * [`ArmError::InvalidServoCommand`] for out-of-range input; nothing is
    ///   written.
    /// * [`ArmError::LinkNotConnected`] after [`close`](Self::close).
    /// * [`ArmError::ProtocolMismatch`] (soft) when an acknowledgement is
    ///   missing or unexpected.
    fn send(&mut self, index: u8, angle: u8) -> Result<(), ArmError>;

    /// Move all six servos.  Defaults to six single-servo sends in index
    /// order.
    fn send_all(&mut self, angles: &JointAngles) -> Result<(), ArmError> {
        for (index, angle) in angles.iter() {
            self.send(index, angle)?;
        }
        Ok(())
    }

    /// Release the transport.  Idempotent.
    fn close(&mut self);
}

// ────────────────────────────────────────────────────────────────────────────
// Fire-and-forget
// ────────────────────────────────────────────────────────────────────────────

pub struct FireAndForgetLink {
    transport: SharedTransport,
}

impl FireAndForgetLink {
    pub fn new(transport: SharedTransport) -> Self {
        Self { transport }
    }
}

impl ActuatorLink for FireAndForgetLink {
    fn id(&self) -> &str {
        "serial"
    }

    fn send(&mut self, index: u8, angle: u8) -> Result<(), ArmError> {
        let packet = ServoPacket::new(index, angle)?;
        self.transport.exchange(|t| {
            t.write_all(&packet.encode())?;
            t.flush()
        })?;
        debug!(index, angle, "servo packet sent");
        Ok(())
    }

    fn close(&mut self) {
        self.transport.close();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Acknowledged
// ────────────────────────────────────────────────────────────────────────────

pub struct AcknowledgedLink {
    transport: SharedTransport,
    ack_timeout: Duration,
}

impl AcknowledgedLink {
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    fn request(&self, frame: &[u8], expected: &str) -> Result<(), ArmError> {
        let timeout = self.ack_timeout;
        let reply = self.transport.exchange(|t| {
            t.write_all(frame)?;
            t.flush()?;
            read_line(t, Instant::now() + timeout)
        })?;

        match reply {
            Some(line) if line.starts_with(expected) => Ok(()),
            other => {
                let received = other.unwrap_or_else(|| "<timeout>".to_string());
                warn!(expected, %received, "unexpected controller reply");
                Err(ArmError::ProtocolMismatch {
                    expected: expected.to_string(),
                    received,
                })
            }
        }
    }
}

impl ActuatorLink for AcknowledgedLink {
    fn id(&self) -> &str {
        "serial-ack"
    }

    fn send(&mut self, index: u8, angle: u8) -> Result<(), ArmError> {
        let packet = ServoPacket::new(index, angle)?;
        self.request(
            &set_angle_request(packet),
            &format!("{SET_ANGLE_ACK} {index}"),
        )
    }

    fn send_all(&mut self, angles: &JointAngles) -> Result<(), ArmError> {
        self.request(&set_all_request(angles), SET_ALL_ACK)
    }

    fn close(&mut self) {
        self.transport.close();
    }
}

/// Read one range sample over the controller link (`[0xFF][0x02]`).
///
/// Lines that are not `IR_READ:` replies are discarded.  No reply within
/// `timeout` yields the fault sentinel rather than an error.
pub fn read_range(
    transport: &SharedTransport,
    timeout: Duration,
) -> Result<armos_types::RangeReading, ArmError> {
    transport.exchange(|t| {
        t.write_all(&protocol::read_range_request())?;
        t.flush()?;
        let deadline = Instant::now() + timeout;
        while let Some(line) = read_line(t, deadline)? {
            if let Some(reading) = protocol::parse_range_reply(&line) {
                return Ok(reading);
            }
            debug!(%line, "discarding non-range line");
        }
        Ok(armos_types::RangeReading::FAULT)
    })
}
