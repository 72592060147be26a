//! Loop pacing and throughput statistics for the reflex unit.

use std::time::{Duration, Instant};

/// Fixed-period pacer.  [`LoopRate::sleep`] waits out whatever is left of the
/// current period; an overrun starts the next period immediately instead of
/// trying to catch up.
#[derive(Debug)]
pub struct LoopRate {
    period: Duration,
    next: Instant,
}

impl LoopRate {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    /// Pacer for `hz` cycles per second.  Non-positive rates mean "as fast
    /// as possible".
    pub fn from_hz(hz: f64) -> Self {
        if hz.is_finite() && hz > 0.0 {
            Self::new(Duration::from_secs_f64(1.0 / hz))
        } else {
            Self::new(Duration::ZERO)
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Block until the current period ends.  Returns `true` if the cycle
    /// overran its budget.
    pub fn sleep(&mut self) -> bool {
        let now = Instant::now();
        if now < self.next {
            std::thread::sleep(self.next - now);
            self.next += self.period;
            false
        } else {
            self.next = now + self.period;
            !self.period.is_zero()
        }
    }
}

/// One FPS report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsReport {
    pub fps: f64,
    pub last_loop: Duration,
}

/// Counts cycles and emits one [`FpsReport`] per window.
#[derive(Debug)]
pub struct FpsMeter {
    window: Duration,
    window_start: Instant,
    frames: u32,
}

impl FpsMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: Instant::now(),
            frames: 0,
        }
    }

    /// Record one finished cycle that took `loop_time`.  Returns a report
    /// once the window has elapsed, then starts a new window.
    pub fn record(&mut self, loop_time: Duration) -> Option<FpsReport> {
        self.frames += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed < self.window {
            return None;
        }
        let report = FpsReport {
            fps: f64::from(self.frames) / elapsed.as_secs_f64(),
            last_loop: loop_time,
        };
        self.frames = 0;
        self.window_start = Instant::now();
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_rate_from_hz() {
        assert_eq!(LoopRate::from_hz(20.0).period(), Duration::from_millis(50));
        assert_eq!(LoopRate::from_hz(0.0).period(), Duration::ZERO);
        assert_eq!(LoopRate::from_hz(f64::NAN).period(), Duration::ZERO);
    }

    #[test]
    fn loop_rate_paces_cycles() {
        let mut rate = LoopRate::new(Duration::from_millis(10));
        let start = Instant::now();
        for _ in 0..3 {
            assert!(!rate.sleep());
        }
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn overrun_does_not_accumulate_debt() {
        let mut rate = LoopRate::new(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(30));
        assert!(rate.sleep());
        // The next cycle gets a full period again rather than returning at once.
        let start = Instant::now();
        assert!(!rate.sleep());
        assert!(start.elapsed() >= Duration::from_millis(3));
    }

    #[test]
    fn fps_meter_reports_once_per_window() {
        let mut meter = FpsMeter::new(Duration::from_millis(20));
        assert!(meter.record(Duration::from_millis(1)).is_none());
        std::thread::sleep(Duration::from_millis(25));
        let report = meter.record(Duration::from_millis(2)).unwrap();
        assert_eq!(report.last_loop, Duration::from_millis(2));
        assert!(report.fps > 0.0);
        assert!(meter.record(Duration::from_millis(1)).is_none());
    }
}
