//! Byte-level transport to the actuator controller.
//!
//! [`Transport`] is the only seam between the wire protocol and the physical
//! port.  [`SerialTransport`] talks to a real UART; [`MockTransport`] is an
//! in-memory double whose read side can be scripted and whose write side can be
//! inspected from tests.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use armos_types::ArmError;
use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::info;

/// Bidirectional byte stream to a device.
pub trait Transport: Send {
    /// Read into `buffer`, returning the number of bytes read.  A read that
    /// times out without data returns `Ok(0)`.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, ArmError>;

    /// Write all of `data`.
    fn write_all(&mut self, data: &[u8]) -> Result<(), ArmError>;

    fn flush(&mut self) -> Result<(), ArmError>;

    /// Drop any bytes already received but not yet read.
    fn discard_input(&mut self) -> Result<(), ArmError> {
        Ok(())
    }
}

/// Read one `\n`-terminated line, giving up at `deadline`.
///
/// Returns `Ok(None)` on timeout.  Trailing `\r` and whitespace are stripped;
/// invalid UTF-8 is replaced rather than rejected.
pub fn read_line(
    transport: &mut dyn Transport,
    deadline: Instant,
) -> Result<Option<String>, ArmError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if transport.read(&mut byte)? == 1 {
            if byte[0] == b'\n' {
                return Ok(Some(String::from_utf8_lossy(&line).trim_end().to_string()));
            }
            line.push(byte[0]);
            continue;
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Serial
// ────────────────────────────────────────────────────────────────────────────

/// UART transport (8N1, no flow control).
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `path` at `baud_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Io`] if the port cannot be opened.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, ArmError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| ArmError::Io(format!("{path}: {e}")))?;

        info!(port = path, baud_rate, "serial port opened");
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, ArmError> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ArmError> {
        Ok(self.port.write_all(data)?)
    }

    fn flush(&mut self) -> Result<(), ArmError> {
        Ok(self.port.flush()?)
    }

    fn discard_input(&mut self) -> Result<(), ArmError> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| ArmError::Io(e.to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Mock
// ────────────────────────────────────────────────────────────────────────────

/// In-memory transport for tests.  Clones share the same buffers, so a test
/// can keep one handle while the link owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    read_buffer: VecDeque<u8>,
    written: Vec<u8>,
    fail_writes: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the reader.
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// Queue a text line (a `\r\n` terminator is appended).
    pub fn inject_line(&self, line: &str) {
        let mut inner = self.inner.lock();
        inner.read_buffer.extend(line.as_bytes());
        inner.read_buffer.extend(b"\r\n");
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().written.clone()
    }

    pub fn clear_written(&self) {
        self.inner.lock().written.clear();
    }

    /// Make every subsequent write fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, ArmError> {
        let mut inner = self.inner.lock();
        let n = inner.read_buffer.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ArmError> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(ArmError::Io("mock write failure".to_string()));
        }
        inner.written.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ArmError> {
        Ok(())
    }

    fn discard_input(&mut self) -> Result<(), ArmError> {
        self.inner.lock().read_buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_line_strips_terminator() {
        let mut mock = MockTransport::new();
        mock.inject_line("Ready.");
        let line = read_line(&mut mock, Instant::now() + Duration::from_millis(50)).unwrap();
        assert_eq!(line.as_deref(), Some("Ready."));
    }

    #[test]
    fn read_line_times_out_on_partial_line() {
        let mut mock = MockTransport::new();
        mock.inject_read(b"IR_RE");
        let line = read_line(&mut mock, Instant::now() + Duration::from_millis(5)).unwrap();
        assert!(line.is_none());
    }

    #[test]
    fn clones_share_buffers() {
        let observer = MockTransport::new();
        let mut owned = observer.clone();
        owned.write_all(&[0xFF, 0x01]).unwrap();
        assert_eq!(observer.written(), vec![0xFF, 0x01]);

        observer.fail_writes(true);
        assert!(matches!(owned.write_all(&[0]), Err(ArmError::Io(_))));
    }

    #[test]
    fn discard_input_drops_pending_bytes() {
        let mut mock = MockTransport::new();
        mock.inject_line("noise");
        mock.discard_input().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(mock.read(&mut buf).unwrap(), 0);
    }
}
