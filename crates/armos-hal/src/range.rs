//! Range sensing.
//!
//! [`RangeSensor`] is the capability the executor reads each tick.  Two
//! sources exist:
//!
//! * [`LinkRangeSensor`] asks the actuator controller (`[0xFF][0x02]`).  Only
//!   acknowledged firmware answers that request, and each read holds the
//!   serial port for a round-trip.
//! * [`UdpRangeFeed`] receives readings pushed by an external sensor process,
//!   leaving the servo stream untouched.  This is the source for
//!   fire-and-forget firmware, which only understands 4-byte servo packets.
//!
//! [`RangePoller`] keeps either cost off the control thread: it reads a sensor
//! at a fixed period and publishes every sample into a [`RangeCell`], which
//! itself implements `RangeSensor` by returning the latest snapshot.

use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use armos_types::{ArmError, RangeReading};
use tracing::{debug, info, warn};

use crate::link::{SharedTransport, read_range};
use crate::protocol::parse_range_reply;

/// Reply timeout for a range request over the controller link.
pub const RANGE_REPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// A distance sensor reporting centimetres.
pub trait RangeSensor: Send {
    fn id(&self) -> &str;

    /// Take one reading.  A sensor that answers but has no valid measurement
    /// returns [`RangeReading::FAULT`]; `Err` is reserved for transport
    /// failures.
    fn read(&mut self) -> Result<RangeReading, ArmError>;
}

/// Range sensor behind the actuator controller (`[0xFF][0x02]` request).
pub struct LinkRangeSensor {
    transport: SharedTransport,
    timeout: Duration,
}

impl LinkRangeSensor {
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            timeout: RANGE_REPLY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl RangeSensor for LinkRangeSensor {
    fn id(&self) -> &str {
        "link_range"
    }

    fn read(&mut self) -> Result<RangeReading, ArmError> {
        read_range(&self.transport, self.timeout)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// UDP feed
// ────────────────────────────────────────────────────────────────────────────

/// Readings older than this are reported as the fault sentinel.
pub const DEFAULT_MAX_RANGE_AGE: Duration = Duration::from_millis(500);

const MAX_RANGE_DATAGRAM: usize = 64;

/// Non-blocking UDP receiver for range readings.
///
/// Each datagram is one reading in centimetres, either bare (`"12.5"`) or in
/// the controller's reply form (`"IR_READ:12.5"`).  Every read drains the
/// socket and keeps the newest value; nothing received within `max_age`
/// reads as [`RangeReading::FAULT`].
pub struct UdpRangeFeed {
    socket: UdpSocket,
    max_age: Duration,
    latest: Option<(Instant, RangeReading)>,
    buffer: [u8; MAX_RANGE_DATAGRAM],
}

impl UdpRangeFeed {
    /// Bind to `bind_addr`, e.g. `"0.0.0.0:5006"`.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Io`] if the socket cannot be bound.
    pub fn bind(bind_addr: &str, max_age: Duration) -> Result<Self, ArmError> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;
        info!(addr = bind_addr, "range feed bound");
        Ok(Self {
            socket,
            max_age,
            latest: None,
            buffer: [0u8; MAX_RANGE_DATAGRAM],
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
            match parse_range_datagram(&self.buffer[..len]) {
                Some(reading) => self.latest = Some((Instant::now(), reading)),
                None => warn!(len, "malformed range datagram"),
            }
        }
    }
}

fn parse_range_datagram(bytes: &[u8]) -> Option<RangeReading> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    parse_range_reply(text).or_else(|| text.parse::<f32>().ok().map(RangeReading))
}

impl RangeSensor for UdpRangeFeed {
    fn id(&self) -> &str {
        "udp_range"
    }

    fn read(&mut self) -> Result<RangeReading, ArmError> {
        self.drain()?;
        match self.latest {
            Some((at, reading)) if at.elapsed() <= self.max_age => Ok(reading),
            _ => Ok(RangeReading::FAULT),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RangeCell
// ────────────────────────────────────────────────────────────────────────────

/// Latest range sample, shared lock-free between a writer and readers.
///
/// Starts out holding the fault sentinel.
#[derive(Clone)]
pub struct RangeCell {
    bits: Arc<AtomicU32>,
}

impl Default for RangeCell {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeCell {
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU32::new(RangeReading::FAULT.0.to_bits())),
        }
    }

    pub fn publish(&self, reading: RangeReading) {
        self.bits.store(reading.0.to_bits(), Ordering::Release);
    }

    pub fn snapshot(&self) -> RangeReading {
        RangeReading(f32::from_bits(self.bits.load(Ordering::Acquire)))
    }
}

impl RangeSensor for RangeCell {
    fn id(&self) -> &str {
        "range_cell"
    }

    fn read(&mut self) -> Result<RangeReading, ArmError> {
        Ok(self.snapshot())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RangePoller
// ────────────────────────────────────────────────────────────────────────────

/// Background thread feeding a [`RangeCell`].
pub struct RangePoller {
    handle: JoinHandle<()>,
}

impl RangePoller {
    /// Start polling `sensor` every `period` until `shutdown` is raised.
    ///
    /// Every result is published, faults included, so a stale valid reading
    /// never outlives a failing sensor.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Io`] if the thread cannot be spawned.
    pub fn spawn(
        mut sensor: Box<dyn RangeSensor>,
        cell: RangeCell,
        period: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, ArmError> {
        let handle = std::thread::Builder::new()
            .name("range-poller".to_string())
            .spawn(move || {
                info!(sensor = sensor.id(), period_ms = period.as_millis() as u64, "range poller started");
                while !shutdown.load(Ordering::Relaxed) {
                    let reading = match sensor.read() {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(error = %e, "range read failed");
                            RangeReading::FAULT
                        }
                    };
                    debug!(cm = reading.0, "range sample");
                    cell.publish(reading);
                    std::thread::sleep(period);
                }
                info!("range poller stopped");
            })?;
        Ok(Self { handle })
    }

    /// Wait for the thread to exit (the shutdown flag must already be set).
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!("range poller panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{ActuatorLink, FireAndForgetLink};
    use crate::protocol::ServoPacket;
    use crate::transport::MockTransport;
    use std::collections::VecDeque;

    struct ScriptedSensor {
        script: VecDeque<Result<RangeReading, ArmError>>,
    }

    impl RangeSensor for ScriptedSensor {
        fn id(&self) -> &str {
            "scripted"
        }

        fn read(&mut self) -> Result<RangeReading, ArmError> {
            self.script.pop_front().unwrap_or(Ok(RangeReading(42.0)))
        }
    }

    #[test]
    fn cell_starts_faulted_and_publishes() {
        let mut cell = RangeCell::new();
        assert!(!cell.snapshot().is_valid());
        let writer = cell.clone();
        writer.publish(RangeReading(7.25));
        assert_eq!(cell.read().unwrap(), RangeReading(7.25));
        writer.publish(RangeReading::FAULT);
        assert_eq!(cell.snapshot().cm(), None);
    }

    #[test]
    fn poller_publishes_until_shutdown() {
        let cell = RangeCell::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let sensor = ScriptedSensor {
            script: VecDeque::from([Err(ArmError::Io("glitch".into())), Ok(RangeReading(3.0))]),
        };
        let poller = RangePoller::spawn(
            Box::new(sensor),
            cell.clone(),
            Duration::from_millis(1),
            shutdown.clone(),
        )
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while cell.snapshot() != RangeReading(42.0) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        shutdown.store(true, Ordering::Relaxed);
        poller.join();
        assert_eq!(cell.snapshot(), RangeReading(42.0));
    }

    #[test]
    fn link_sensor_reads_over_transport() {
        let wire = MockTransport::new();
        wire.inject_line("IR_READ:15.0");
        let mut sensor = LinkRangeSensor::new(SharedTransport::new(wire))
            .with_timeout(Duration::from_millis(20));
        assert_eq!(sensor.read().unwrap(), RangeReading(15.0));
        assert_eq!(sensor.read().unwrap(), RangeReading::FAULT);
    }

    fn range_feed(max_age: Duration) -> (UdpRangeFeed, UdpSocket) {
        let feed = UdpRangeFeed::bind("127.0.0.1:0", max_age).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.connect(feed.local_addr().unwrap()).unwrap();
        (feed, sender)
    }

    fn wait_for_reading(feed: &mut UdpRangeFeed, want: RangeReading) -> RangeReading {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let reading = feed.read().unwrap();
            if reading == want || std::time::Instant::now() > deadline {
                return reading;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn udp_feed_is_faulted_until_a_reading_arrives() {
        let (mut feed, _sender) = range_feed(DEFAULT_MAX_RANGE_AGE);
        assert_eq!(feed.id(), "udp_range");
        assert_eq!(feed.read().unwrap(), RangeReading::FAULT);
    }

    #[test]
    fn udp_feed_accepts_bare_and_prefixed_readings() {
        let (mut feed, sender) = range_feed(Duration::from_secs(5));
        sender.send(b"12.5\n").unwrap();
        assert_eq!(wait_for_reading(&mut feed, RangeReading(12.5)), RangeReading(12.5));

        sender.send(b"garbage").unwrap();
        sender.send(b"IR_READ:4.0").unwrap();
        assert_eq!(wait_for_reading(&mut feed, RangeReading(4.0)), RangeReading(4.0));
    }

    #[test]
    fn udp_feed_stale_reading_is_a_fault() {
        let (mut feed, sender) = range_feed(Duration::from_millis(30));
        sender.send(b"9").unwrap();
        assert_eq!(wait_for_reading(&mut feed, RangeReading(9.0)), RangeReading(9.0));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(feed.read().unwrap(), RangeReading::FAULT);
    }

    #[test]
    fn udp_feed_leaves_the_servo_wire_alone() {
        let wire = MockTransport::new();
        let mut link = FireAndForgetLink::new(SharedTransport::new(wire.clone()));
        let (mut feed, sender) = range_feed(Duration::from_secs(5));
        sender.send(b"20").unwrap();

        link.send(5, 90).unwrap();
        assert_eq!(wait_for_reading(&mut feed, RangeReading(20.0)), RangeReading(20.0));
        link.send(4, 150).unwrap();
        link.send(3, 30).unwrap();

        let mut expected = Vec::new();
        for (index, angle) in [(5, 90), (4, 150), (3, 30)] {
            expected.extend(ServoPacket::new(index, angle).unwrap().encode());
        }
        assert_eq!(wire.written(), expected);
    }
}
