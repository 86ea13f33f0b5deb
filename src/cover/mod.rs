//! Motorized cover driver.
//!
//! Covers only understand `UP`, `DOWN` and `STOP`. With both travel times
//! configured the driver tracks a continuous position between 0 (open) and
//! 100 (closed) from command timing alone, recalibrating against an end stop
//! whenever the position becomes uncertain. Without travel times it degrades
//! to a binary open/closed state.
//!
//! Each cover runs as its own task; [`CoverHandle`] is the clonable front end.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use rflink_gateway::cover::{self, CoverConfig};
//! use rflink_gateway::{LinkConfig, RfLink, SerialConfig};
//!
//! # async fn example() -> Result<(), rflink_gateway::Error> {
//! let mut link = RfLink::serial(SerialConfig::new("/dev/ttyACM0"), LinkConfig::default());
//! link.start();
//!
//! let config = CoverConfig::new("BrelMotor:19a7d2")
//!     .open_time(Duration::from_secs(22))
//!     .close_time(Duration::from_secs(20));
//! let blind = cover::spawn(config, link.handle());
//! blind.move_to(40.0)?;
//! # Ok(())
//! # }
//! ```

mod controller;
pub mod motion;

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::commands::CommandSink;
use crate::devices::DeviceDriver;
use crate::error::{Error, Result};
use crate::types::RadioFrame;

use controller::{Controller, Request};
pub use motion::Direction;

/// Per-cover settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverConfig {
    /// Device id in `Protocol:ID[:SWITCH]` notation.
    pub device_id: String,
    /// Travel time from fully closed to fully open.
    pub open_time: Duration,
    /// Travel time from fully open to fully closed.
    pub close_time: Duration,
}

impl CoverConfig {
    /// Creates a simple cover without travel times.
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            open_time: Duration::ZERO,
            close_time: Duration::ZERO,
        }
    }

    /// Sets the full opening time.
    #[must_use]
    pub const fn open_time(mut self, time: Duration) -> Self {
        self.open_time = time;
        self
    }

    /// Sets the full closing time.
    #[must_use]
    pub const fn close_time(mut self, time: Duration) -> Self {
        self.close_time = time;
        self
    }

    /// Returns true if both travel times are known and the position is tracked.
    #[must_use]
    pub const fn is_advanced(&self) -> bool {
        !self.open_time.is_zero() && !self.close_time.is_zero()
    }

    /// Full travel time in `direction`.
    #[must_use]
    pub const fn full_travel(&self, direction: Direction) -> Duration {
        match direction {
            Direction::Open => self.open_time,
            Direction::Close => self.close_time,
        }
    }

    /// Signed travel speed in `direction`, in milliseconds per percent.
    #[must_use]
    pub fn ms_per_percent(&self, direction: Direction) -> f64 {
        let ms = self.full_travel(direction).as_secs_f64() * 1000.0 / 100.0;
        match direction {
            Direction::Open => -ms,
            Direction::Close => ms,
        }
    }
}

/// Commands accepted by a cover.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoverCommand {
    /// Drive fully open.
    Open,
    /// Drive fully closed.
    Close,
    /// Stop wherever the cover is.
    Stop,
    /// Drive to a position, 0 (open) to 100 (closed).
    Position(f64),
    /// Recalibrate via an end stop, then drive to the target
    /// (default: the last known position).
    Recalibrate(Option<f64>),
}

/// State of a cover without travel times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimpleState {
    /// Last driven up.
    Open,
    /// Last driven down.
    Closed,
}

/// What a cover is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverPhase {
    /// Standing still at a known position.
    Idle,
    /// Travelling in a direction.
    Moving(Direction),
    /// Position unknown until the next recalibration.
    PositionUncertain,
    /// Driving to an end stop before the actual target.
    Recalibrating,
}

/// Published cover state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverStatus {
    /// Position tracking enabled.
    pub advanced: bool,
    /// The link to the transceiver is up.
    pub online: bool,
    /// Last computed position, refreshed while moving.
    pub position: Option<f64>,
    /// Binary state of simple covers.
    pub state: Option<SimpleState>,
    /// Travel direction while moving.
    pub moving: Option<Direction>,
    /// The position cannot be trusted until recalibrated.
    pub uncertain: bool,
    /// Target of a running recalibration.
    pub recalibration_target: Option<f64>,
    /// Target waiting for the link to come up.
    pub deferred_target: Option<f64>,
}

impl CoverStatus {
    /// Position rounded to steps of 5.
    #[must_use]
    pub fn reported_position(&self) -> Option<u8> {
        self.position.map(motion::rounded)
    }

    /// Summarizes the state for display.
    #[must_use]
    pub const fn phase(&self) -> CoverPhase {
        if self.recalibration_target.is_some() {
            CoverPhase::Recalibrating
        } else if let Some(direction) = self.moving {
            CoverPhase::Moving(direction)
        } else if self.uncertain {
            CoverPhase::PositionUncertain
        } else {
            CoverPhase::Idle
        }
    }
}

/// Clonable access to a running cover.
///
/// The cover task ends when the last handle is dropped.
#[derive(Clone)]
pub struct CoverHandle {
    device_id: String,
    requests: mpsc::UnboundedSender<Request>,
    status: watch::Receiver<CoverStatus>,
}

/// Starts a cover task sending its commands through `sink`.
pub fn spawn<S: CommandSink>(config: CoverConfig, sink: S) -> CoverHandle {
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(CoverStatus {
        advanced: config.is_advanced(),
        ..CoverStatus::default()
    });
    let device_id = config.device_id.clone();
    tokio::spawn(Controller::new(config, sink, requests_rx, status_tx).run());

    CoverHandle {
        device_id,
        requests: requests_tx,
        status: status_rx,
    }
}

impl CoverHandle {
    /// The cover's device id.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Queues a command.
    pub fn command(&self, command: CoverCommand) -> Result<()> {
        self.send(Request::Command(command))
    }

    /// Drives fully open.
    pub fn open(&self) -> Result<()> {
        self.command(CoverCommand::Open)
    }

    /// Drives fully closed.
    pub fn close(&self) -> Result<()> {
        self.command(CoverCommand::Close)
    }

    /// Stops the cover, or drops a deferred move while offline.
    pub fn stop(&self) -> Result<()> {
        self.command(CoverCommand::Stop)
    }

    /// Drives to `position`, 0 (open) to 100 (closed).
    pub fn move_to(&self, position: f64) -> Result<()> {
        self.command(CoverCommand::Position(position))
    }

    /// Recalibrates via an end stop, then drives to `target`.
    pub fn recalibrate(&self, target: Option<f64>) -> Result<()> {
        self.command(CoverCommand::Recalibrate(target))
    }

    /// Returns the latest published state.
    #[must_use]
    pub fn status(&self) -> CoverStatus {
        self.status.borrow().clone()
    }

    /// Returns a receiver notified on every state change.
    #[must_use]
    pub fn status_changes(&self) -> watch::Receiver<CoverStatus> {
        self.status.clone()
    }

    fn send(&self, request: Request) -> Result<()> {
        self.requests.send(request).map_err(|_| Error::ChannelClosed)
    }
}

impl DeviceDriver for CoverHandle {
    fn dispatch_key(&self) -> &str {
        &self.device_id
    }

    fn on_telemetry(&self, frame: &RadioFrame) {
        if self.send(Request::Telemetry(frame.clone())).is_err() {
            tracing::debug!("cover '{}' is gone, dropping frame", self.device_id);
        }
    }

    fn on_link_state(&self, active: bool) {
        if self.send(Request::Online(active)).is_err() {
            tracing::debug!("cover '{}' is gone", self.device_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::FutureExt;
    use futures::future::BoxFuture;
    use tokio::time::Instant;

    use super::*;
    use crate::commands::Ack;

    #[derive(Clone, Default)]
    struct ImmediateSink {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl CommandSink for ImmediateSink {
        fn send_command(&self, device_id: &str, action: &str) -> BoxFuture<'static, Result<Ack>> {
            self.sent
                .lock()
                .unwrap()
                .push(format!("{device_id} {action}"));
            let ack = Ack {
                payload: None,
                sent_at: Instant::now(),
                latency: Duration::ZERO,
            };
            async move { Ok(ack) }.boxed()
        }
    }

    #[test]
    fn test_config() {
        let config = CoverConfig::new("BrelMotor:19a7d2")
            .open_time(Duration::from_secs(20))
            .close_time(Duration::from_secs(10));
        assert!(config.is_advanced());
        assert!((config.ms_per_percent(Direction::Open) + 200.0).abs() < f64::EPSILON);
        assert!((config.ms_per_percent(Direction::Close) - 100.0).abs() < f64::EPSILON);
        assert!(!CoverConfig::new("x").close_time(Duration::from_secs(1)).is_advanced());
    }

    #[test]
    fn test_status_phase() {
        let mut status = CoverStatus {
            position: Some(42.0),
            ..CoverStatus::default()
        };
        assert_eq!(status.phase(), CoverPhase::Idle);
        assert_eq!(status.reported_position(), Some(40));
        status.uncertain = true;
        assert_eq!(status.phase(), CoverPhase::PositionUncertain);
        status.recalibration_target = Some(10.0);
        assert_eq!(status.phase(), CoverPhase::Recalibrating);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_cover_recalibrates_on_first_contact() {
        let sink = ImmediateSink::default();
        let config = CoverConfig::new("BrelMotor:19a7d2")
            .open_time(Duration::from_secs(10))
            .close_time(Duration::from_secs(10));
        let blind = spawn(config, sink.clone());
        let mut changes = blind.status_changes();

        blind.move_to(20.0).unwrap();
        changes
            .wait_for(|s| s.deferred_target == Some(20.0))
            .await
            .unwrap();
        assert!(sink.sent.lock().unwrap().is_empty());

        blind.on_link_state(true);
        changes
            .wait_for(|s| s.phase() == CoverPhase::Recalibrating)
            .await
            .unwrap();
        let status = changes
            .wait_for(|s| s.phase() == CoverPhase::Idle && s.position.is_some_and(|p| p > 10.0))
            .await
            .unwrap()
            .clone();
        assert_eq!(status.reported_position(), Some(20));
        assert_eq!(
            *sink.sent.lock().unwrap(),
            [
                "BrelMotor:19a7d2 UP",
                "BrelMotor:19a7d2 DOWN",
                "BrelMotor:19a7d2 STOP"
            ]
        );
    }
}
