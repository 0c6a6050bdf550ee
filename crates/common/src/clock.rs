//! Clock and timing utilities for capture and playback.
//!
//! Exported streams are stamped against a monotonic epoch taken when the
//! encoder starts. This module provides:
//! - The capture epoch
//! - Frame cadence for the draw loop
//! - Audio/video drift measurement

use std::time::{Duration, Instant};

/// Monotonic clock anchored to the moment capture started.
#[derive(Debug, Clone)]
pub struct CaptureClock {
    epoch: Instant,
}

impl CaptureClock {
    /// Create a new capture clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Time elapsed since capture start.
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Fixed frame cadence used by the compositing draw loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    fps: u32,
}

impl FrameClock {
    /// A zero rate is treated as 1 fps.
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1) }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Interval between two draw ticks.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.fps as u64)
    }
}

/// Drift measurement between two streams.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Timestamp in the reference stream (ns).
    pub reference_ns: u64,
    /// Timestamp in the measured stream (ns).
    pub measured_ns: u64,
}

impl DriftMeasurement {
    /// Drift in nanoseconds (positive = measured is ahead).
    pub fn drift_ns(&self) -> i64 {
        self.measured_ns as i64 - self.reference_ns as i64
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_ns() as f64 / 1_000_000.0
    }

    /// Whether the measured stream lags the reference by more than `threshold_ms`.
    pub fn lags_by_more_than_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms() < -threshold_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = CaptureClock::start();
        assert!(clock.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_frame_clock_cadence() {
        let clock = FrameClock::new(30);
        assert_eq!(clock.frame_interval(), Duration::from_nanos(33_333_333));
        assert_eq!(FrameClock::new(0).fps(), 1);
    }

    #[test]
    fn test_drift_measurement() {
        let drift = DriftMeasurement {
            reference_ns: 1_000_000_000,
            measured_ns: 400_000_000,
        };
        assert_eq!(drift.drift_ns(), -600_000_000);
        assert!(drift.lags_by_more_than_ms(500.0));
        assert!(!drift.lags_by_more_than_ms(700.0));
    }
}
