//! Position arithmetic for timed covers.
//!
//! Positions run from 0 (fully open) to 100 (fully closed). Travel speed is
//! expressed in milliseconds per percent, negative while opening and
//! positive while closing, so `position = start + elapsed / ms_per_percent`.

use std::time::Duration;

use tokio::time::Instant;

/// Fully open.
pub const OPEN: f64 = 0.0;

/// Fully closed.
pub const CLOSED: f64 = 100.0;

/// Moves shorter than this many percent are not worth a motor start.
pub const MIN_DELTA: f64 = 3.0;

/// Targets below this recalibrate via the open end stop.
pub const RECALIBRATION_THRESHOLD: f64 = 50.0;

/// Extra travel time when driving into an end stop.
pub const END_STOP_MULTIPLIER: f64 = 1.1;

/// Travel direction of a cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Towards 0.
    Open,
    /// Towards 100.
    Close,
}

impl Direction {
    /// Direction needed to cover `delta` percent.
    #[must_use]
    pub fn of(delta: f64) -> Self {
        if delta < 0.0 { Self::Open } else { Self::Close }
    }

    /// Radio action driving the motor this way.
    #[must_use]
    pub const fn action(self) -> &'static str {
        match self {
            Self::Open => "UP",
            Self::Close => "DOWN",
        }
    }

    /// The end stop reached when travelling this way.
    #[must_use]
    pub const fn end_stop(self) -> f64 {
        match self {
            Self::Open => OPEN,
            Self::Close => CLOSED,
        }
    }
}

/// Interpolated position after `elapsed_ms`, clamped to 0..=100.
#[must_use]
pub fn interpolate(start_position: f64, ms_per_percent: f64, elapsed_ms: f64) -> f64 {
    if ms_per_percent.abs() < f64::EPSILON {
        return start_position.clamp(OPEN, CLOSED);
    }
    (start_position + elapsed_ms / ms_per_percent).clamp(OPEN, CLOSED)
}

/// Time needed to travel `delta` percent.
#[must_use]
pub fn travel_time(delta: f64, ms_per_percent: f64, end_stop: bool) -> Duration {
    let multiplier = if end_stop { END_STOP_MULTIPLIER } else { 1.0 };
    let ms = (delta * ms_per_percent * multiplier).abs();
    Duration::from_micros((ms * 1000.0).round() as u64)
}

/// Returns true for targets that are end stops.
#[must_use]
pub fn is_end_stop(target: f64) -> bool {
    target <= OPEN || target >= CLOSED
}

/// Position rounded to steps of 5 for display.
#[must_use]
pub fn rounded(position: f64) -> u8 {
    ((position.clamp(OPEN, CLOSED) / 5.0).round() * 5.0) as u8
}

/// A motion in progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Motion {
    pub direction: Direction,
    pub ms_per_percent: f64,
    pub started_at: Instant,
    pub start_position: f64,
}

impl Motion {
    /// Position at `at`; instants before the start count as no travel.
    pub(crate) fn position_at(&self, at: Instant) -> f64 {
        let elapsed = at.saturating_duration_since(self.started_at);
        interpolate(
            self.start_position,
            self.ms_per_percent,
            elapsed.as_secs_f64() * 1000.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate() {
        assert!((interpolate(0.0, 10.0, 500.0) - 50.0).abs() < f64::EPSILON);
        assert!((interpolate(0.0, 10.0, 2000.0) - CLOSED).abs() < f64::EPSILON);
        assert!((interpolate(80.0, -20.0, 1000.0) - 30.0).abs() < f64::EPSILON);
        assert!((interpolate(10.0, -20.0, 1000.0) - OPEN).abs() < f64::EPSILON);
    }

    #[test]
    fn test_travel_time() {
        assert_eq!(travel_time(25.0, -20.0, false), Duration::from_millis(500));
        assert_eq!(travel_time(-40.0, 10.0, false), Duration::from_millis(400));
        assert_eq!(travel_time(25.0, 10.0, true), Duration::from_millis(275));
    }

    #[test]
    fn test_direction() {
        assert_eq!(Direction::of(-5.0), Direction::Open);
        assert_eq!(Direction::of(5.0), Direction::Close);
        assert_eq!(Direction::Open.action(), "UP");
        assert!((Direction::Close.end_stop() - CLOSED).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rounded() {
        assert_eq!(rounded(0.0), 0);
        assert_eq!(rounded(73.0), 75);
        assert_eq!(rounded(71.9), 70);
        assert_eq!(rounded(101.0), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_motion_position() {
        let started_at = Instant::now();
        let motion = Motion {
            direction: Direction::Close,
            ms_per_percent: 10.0,
            started_at,
            start_position: 0.0,
        };
        assert!((motion.position_at(started_at + Duration::from_millis(500)) - 50.0).abs() < 1e-9);
        // acknowledged send times may lie ahead of the clock
        let before = started_at.checked_sub(Duration::from_millis(5)).unwrap();
        assert!(motion.position_at(before).abs() < f64::EPSILON);
    }
}
