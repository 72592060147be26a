//! Object detections from the vision collaborator.
//!
//! Frame capture and detector inference run outside this process.  The
//! control loop only sees a [`PerceptionSource`]: "what is in view right now".
//! [`UdpDetectionFeed`] receives JSON arrays of
//! [`Detection`][armos_types::Detection] pushed by an external detector.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use armos_types::{ArmError, Detection};
use tracing::{debug, info, warn};

/// Frames older than this are treated as "nothing in view".
pub const DEFAULT_MAX_FRAME_AGE: Duration = Duration::from_millis(500);

const MAX_DATAGRAM_SIZE: usize = 65536;

/// A source of per-tick detections.
pub trait PerceptionSource: Send {
    fn id(&self) -> &str;

    /// Detections in the most recent frame.  An empty list means nothing is
    /// in view.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::SensorFault`] or [`ArmError::Io`] when the source
    /// itself is broken; the caller skips the cycle.
    fn detections(&mut self) -> Result<Vec<Detection>, ArmError>;
}

/// Non-blocking UDP receiver for detection frames.
///
/// Each datagram is one frame: a JSON array of
/// `{centerX, centerY, label, confidence}` objects.  Every call drains the
/// socket and keeps only the newest frame.
pub struct UdpDetectionFeed {
    socket: UdpSocket,
    max_age: Duration,
    latest: Option<(Instant, Vec<Detection>)>,
    buffer: Vec<u8>,
}

impl UdpDetectionFeed {
    /// Bind to `bind_addr`, e.g. `"0.0.0.0:5600"`.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Io`] if the socket cannot be bound.
    pub fn bind(bind_addr: &str, max_age: Duration) -> Result<Self, ArmError> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;
        info!(addr = bind_addr, "detection feed bound");
        Ok(Self {
            socket,
            max_age,
            latest: None,
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ArmError> {
        Ok(self.socket.local_addr()?)
    }

    fn drain(&mut self) -> Result<(), ArmError> {
        loop {
            let len = match self.socket.recv(&mut self.buffer) {
                Ok(len) => len,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<Vec<Detection>>(&self.buffer[..len]) {
                Ok(frame) => {
                    debug!(count = frame.len(), "detection frame");
                    self.latest = Some((Instant::now(), frame));
                }
                Err(e) => warn!(error = %e, len, "malformed detection frame"),
            }
        }
    }
}

impl PerceptionSource for UdpDetectionFeed {
    fn id(&self) -> &str {
        "udp_detections"
    }

    fn detections(&mut self) -> Result<Vec<Detection>, ArmError> {
        self.drain()?;
        match &self.latest {
            Some((at, frame)) if at.elapsed() <= self.max_age => Ok(frame.clone()),
            _ => Ok(Vec::new()),
        }
    }
}
