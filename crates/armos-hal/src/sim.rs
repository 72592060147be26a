//! In-process simulation collaborators for tests and hardware-free runs.
//!
//! Each double is cheap to clone and clones share state, so a test keeps one
//! handle as a recorder while the executor owns another.
//!
//! # Example
//!
//! ```rust
//! use armos_hal::link::ActuatorLink;
//! use armos_hal::sim::SimLink;
//!
//! let recorder = SimLink::new();
//! let mut link = recorder.clone();
//! link.send(5, 90).unwrap();
//! assert_eq!(recorder.sent(), vec![(5, 90)]);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use armos_types::{ArmError, Detection, RangeReading};
use parking_lot::Mutex;
use tracing::debug;

use crate::link::ActuatorLink;
use crate::perception::PerceptionSource;
use crate::protocol::ServoPacket;
use crate::range::RangeSensor;

// ────────────────────────────────────────────────────────────────────────────
// SimLink
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimLinkState {
    sent: Vec<(u8, u8)>,
    failure: Option<ArmError>,
    closed: bool,
}

/// Actuator link that records every accepted servo command.
#[derive(Clone, Default)]
pub struct SimLink {
    state: Arc<Mutex<SimLinkState>>,
}

impl SimLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(index, angle)` accepted so far, in order.
    pub fn sent(&self) -> Vec<(u8, u8)> {
        self.state.lock().sent.clone()
    }

    pub fn clear(&self) {
        self.state.lock().sent.clear();
    }

    /// Make every subsequent send fail with `error` (`None` restores success).
    pub fn fail_with(&self, error: Option<ArmError>) {
        self.state.lock().failure = error;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Most recent angle sent to servo `index`.
    pub fn last_angle(&self, index: u8) -> Option<u8> {
        self.state
            .lock()
            .sent
            .iter()
            .rev()
            .find(|(i, _)| *i == index)
            .map(|(_, a)| *a)
    }
}

impl ActuatorLink for SimLink {
    fn id(&self) -> &str {
        "sim"
    }

    fn send(&mut self, index: u8, angle: u8) -> Result<(), ArmError> {
        let packet = ServoPacket::new(index, angle)?;
        let mut state = self.state.lock();
        if state.closed {
            return Err(ArmError::LinkNotConnected);
        }
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        debug!(index, angle, "sim servo");
        state.sent.push((packet.index(), packet.angle()));
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().closed = true;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimPerception
// ────────────────────────────────────────────────────────────────────────────

struct Script<T> {
    queue: VecDeque<T>,
    last: Option<T>,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            last: None,
        }
    }
}

impl<T: Clone> Script<T> {
    /// Next scripted value; once the queue runs dry the last one repeats.
    fn next(&mut self) -> Option<T> {
        if let Some(v) = self.queue.pop_front() {
            self.last = Some(v);
        }
        self.last.clone()
    }
}

/// Perception source replaying scripted frames.
#[derive(Clone, Default)]
pub struct SimPerception {
    frames: Arc<Mutex<Script<Result<Vec<Detection>, ArmError>>>>,
}

impl SimPerception {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&self, frame: Vec<Detection>) {
        self.frames.lock().queue.push_back(Ok(frame));
    }

    /// Script a failing frame.
    pub fn push_error(&self, error: ArmError) {
        self.frames.lock().queue.push_back(Err(error));
    }

    /// Convenience: a single detection at pixel `(px, py)`.
    pub fn push_object(&self, label: &str, px: f64, py: f64, confidence: f32) {
        self.push_frame(vec![Detection {
            center_x: px,
            center_y: py,
            label: label.to_string(),
            confidence,
        }]);
    }
}

impl PerceptionSource for SimPerception {
    fn id(&self) -> &str {
        "sim_perception"
    }

    fn detections(&mut self) -> Result<Vec<Detection>, ArmError> {
        self.frames.lock().next().unwrap_or(Ok(Vec::new()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRange
// ────────────────────────────────────────────────────────────────────────────

/// Range sensor replaying scripted readings.  Reads the fault sentinel until
/// something is scripted.
#[derive(Clone, Default)]
pub struct SimRange {
    readings: Arc<Mutex<Script<RangeReading>>>,
}

impl SimRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, cm: f32) {
        self.readings.lock().queue.push_back(RangeReading(cm));
    }
}

impl RangeSensor for SimRange {
    fn id(&self) -> &str {
        "sim_range"
    }

    fn read(&mut self) -> Result<RangeReading, ArmError> {
        Ok(self.readings.lock().next().unwrap_or(RangeReading::FAULT))
    }
}
