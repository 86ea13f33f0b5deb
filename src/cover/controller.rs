//! The per-cover actor.
//!
//! The controller owns the cover state. Sent commands, timers and incoming
//! requests are multiplexed in [`Controller::step`], so every transition runs
//! on the cover's own task and nothing is shared.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::commands::{Ack, CommandSink};
use crate::cover::motion::{
    CLOSED, Direction, MIN_DELTA, Motion, OPEN, RECALIBRATION_THRESHOLD, is_end_stop, travel_time,
};
use crate::cover::{CoverCommand, CoverConfig, CoverStatus, SimpleState};
use crate::error::Result;
use crate::types::RadioFrame;

/// Position refresh period while moving.
const REFRESH_PERIOD: Duration = Duration::from_millis(500);

/// Shortest stop timer after latency compensation.
const MIN_RUN: Duration = Duration::from_millis(1);

/// Requests sent from a [`CoverHandle`](crate::cover::CoverHandle).
#[derive(Debug)]
pub(crate) enum Request {
    Command(CoverCommand),
    Telemetry(RadioFrame),
    Online(bool),
}

/// What to do once a sent command completes.
#[derive(Debug, Clone, Copy)]
enum Followup {
    Move {
        direction: Direction,
    },
    Stop,
    Recalibrate {
        epoch: u64,
        direction: Direction,
    },
    Simple {
        state: Option<SimpleState>,
    },
}

type Completion = BoxFuture<'static, (Followup, Result<Ack>)>;

#[derive(Debug, Clone, Copy)]
struct StopTimer {
    at: Instant,
    /// End the motion without sending STOP.
    silent: bool,
}

#[derive(Debug, Clone, Copy)]
struct RecalibrationTimer {
    at: Instant,
    direction: Direction,
}

/// A directional command sent but not yet acknowledged. The travel time is
/// computed from `target` once the ack arrives.
#[derive(Debug, Clone, Copy)]
struct PendingMove {
    direction: Direction,
    target: f64,
}

/// A STOP sent but not yet acknowledged.
#[derive(Debug, Clone, Copy)]
struct PendingStop {
    /// Target to drive to once stopped. Newer requests replace it.
    then: Option<f64>,
}

pub(crate) struct Controller<S> {
    config: CoverConfig,
    sink: S,
    requests: mpsc::UnboundedReceiver<Request>,
    status: watch::Sender<CoverStatus>,

    position: Option<f64>,
    motion: Option<Motion>,
    uncertain: bool,
    recalibration_target: Option<f64>,
    recalibration_epoch: u64,
    deferred_target: Option<f64>,
    simple_state: Option<SimpleState>,
    online: bool,
    initialized: bool,
    pending_move: Option<PendingMove>,
    stopping: Option<PendingStop>,

    stop_timer: Option<StopTimer>,
    refresh: Option<Interval>,
    recalibration_timer: Option<RecalibrationTimer>,
    completions: FuturesUnordered<Completion>,
}

impl<S: CommandSink> Controller<S> {
    pub(crate) fn new(
        config: CoverConfig,
        sink: S,
        requests: mpsc::UnboundedReceiver<Request>,
        status: watch::Sender<CoverStatus>,
    ) -> Self {
        Self {
            config,
            sink,
            requests,
            status,
            position: None,
            motion: None,
            uncertain: false,
            recalibration_target: None,
            recalibration_epoch: 0,
            deferred_target: None,
            simple_state: None,
            online: false,
            initialized: false,
            pending_move: None,
            stopping: None,
            stop_timer: None,
            refresh: None,
            recalibration_timer: None,
            completions: FuturesUnordered::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        while self.step().await {}
        tracing::debug!("cover '{}' controller finished", self.config.device_id);
    }

    /// Handles the next request, completion or timer. Returns false once all
    /// handles are gone.
    pub(crate) async fn step(&mut self) -> bool {
        let stop_at = self.stop_timer.map(|t| t.at);
        let recalibrate_at = self.recalibration_timer.map(|t| t.at);

        tokio::select! {
            request = self.requests.recv() => match request {
                Some(request) => self.on_request(request),
                None => return false,
            },
            Some((followup, result)) = self.completions.next(), if !self.completions.is_empty() => {
                self.on_completion(followup, result);
            }
            () = tokio::time::sleep_until(stop_at.unwrap_or_else(Instant::now)), if stop_at.is_some() => {
                self.on_stop_timer();
            }
            () = tokio::time::sleep_until(recalibrate_at.unwrap_or_else(Instant::now)), if recalibrate_at.is_some() => {
                self.on_recalibration_timer();
            }
            () = tick(self.refresh.as_mut()), if self.refresh.is_some() => self.refresh_position(),
        }
        true
    }

    fn on_request(&mut self, request: Request) {
        match request {
            Request::Command(command) => self.execute(command),
            Request::Telemetry(frame) => self.on_telemetry(&frame),
            Request::Online(online) => self.set_online(online),
        }
    }

    fn execute(&mut self, command: CoverCommand) {
        if !self.config.is_advanced() {
            self.execute_simple(command);
            return;
        }
        match command {
            CoverCommand::Open => self.move_to(OPEN, false),
            CoverCommand::Close => self.move_to(CLOSED, false),
            CoverCommand::Stop => self.user_stop(),
            CoverCommand::Position(target) => self.move_to(target, false),
            CoverCommand::Recalibrate(target) => self.recalibrate(target),
        }
    }

    fn execute_simple(&mut self, command: CoverCommand) {
        let (action, state) = match command {
            CoverCommand::Open => ("UP", Some(SimpleState::Open)),
            CoverCommand::Close => ("DOWN", Some(SimpleState::Closed)),
            CoverCommand::Stop => ("STOP", None),
            CoverCommand::Position(_) | CoverCommand::Recalibrate(_) => {
                tracing::warn!(
                    "cover '{}' has no travel times, ignoring {command:?}",
                    self.config.device_id
                );
                return;
            }
        };
        self.send(action, Followup::Simple { state });
    }

    /// A command seen on air, sent by a remote or another controller.
    fn on_telemetry(&mut self, frame: &RadioFrame) {
        let Some(command) = frame.command().map(str::to_ascii_uppercase) else {
            return;
        };

        if !self.config.is_advanced() {
            match command.as_str() {
                "UP" => self.set_simple(SimpleState::Open),
                "DOWN" => self.set_simple(SimpleState::Closed),
                _ => {}
            }
            return;
        }

        let direction = match command.as_str() {
            "UP" => Some(Direction::Open),
            "DOWN" => Some(Direction::Close),
            "STOP" => None,
            _ => return,
        };
        if self.intervenes() {
            return;
        }
        if self.pending_move.is_some() || self.stopping.is_some() {
            tracing::warn!(
                "cover '{}' commanded remotely while a command is in flight, position uncertain",
                self.config.device_id
            );
            self.abandon_pending();
            self.uncertain = true;
            self.publish();
            return;
        }
        match direction {
            Some(direction) => self.move_to(direction.end_stop(), true),
            None => self.stop(true, None),
        }
    }

    fn set_online(&mut self, online: bool) {
        if self.online == online {
            return;
        }
        self.online = online;
        tracing::info!(
            "cover '{}' is {}",
            self.config.device_id,
            if online { "online" } else { "offline" }
        );

        if online && self.config.is_advanced() {
            if !self.initialized {
                self.initialized = true;
                self.uncertain = true;
            }
            if let Some(target) = self.deferred_target.take() {
                self.move_to(target, false);
            }
        }
        self.publish();
    }

    /// Drives towards `target`. Simulated moves only track a motion someone
    /// else started and never send anything.
    fn move_to(&mut self, target: f64, simulated: bool) {
        if !target.is_finite() {
            tracing::warn!(
                "ignoring invalid target {target} for cover '{}'",
                self.config.device_id
            );
            return;
        }
        let target = target.clamp(OPEN, CLOSED);

        if !self.online {
            tracing::info!(
                "cover '{}' will move to {target}% as soon as it is online",
                self.config.device_id
            );
            self.deferred_target = Some(target);
            self.publish();
            return;
        }

        if self.uncertain || self.recalibration_target.is_some() {
            self.recalibrate(Some(target));
            return;
        }

        if let Some(stop) = self.stopping.as_mut() {
            tracing::debug!(
                "cover '{}' is stopping, moving to {target}% afterwards",
                self.config.device_id
            );
            stop.then = Some(target);
            return;
        }

        let now = Instant::now();
        let Some(current) = self.current_position(now) else {
            self.recalibrate(Some(target));
            return;
        };
        let delta = target - current;

        if let Some(pending) = self.pending_move {
            if delta.abs() >= MIN_DELTA && Direction::of(delta) == pending.direction {
                tracing::debug!(
                    "cover '{}' not yet moving, retargeting to {target}%",
                    self.config.device_id
                );
                self.pending_move = Some(PendingMove {
                    direction: pending.direction,
                    target,
                });
            } else {
                tracing::debug!(
                    "cover '{}' not yet moving, stopping first",
                    self.config.device_id
                );
                self.stop(false, Some(target));
            }
            return;
        }

        if let Some(motion) = self.motion {
            if delta.abs() >= f64::EPSILON && Direction::of(delta) != motion.direction {
                tracing::debug!("cover '{}' reverses, stopping first", self.config.device_id);
                self.stop(simulated, Some(target));
                return;
            }
        }

        if delta.abs() < MIN_DELTA {
            if delta.abs() >= f64::EPSILON {
                tracing::debug!(
                    "ignoring move of {delta:.1}% for cover '{}'",
                    self.config.device_id
                );
            }
            if self.motion.is_some() {
                self.stop(simulated, None);
            }
            return;
        }

        let direction = Direction::of(delta);
        let end_stop = is_end_stop(target);
        let travel = travel_time(delta, self.config.ms_per_percent(direction), end_stop);

        if self.motion.is_some() {
            tracing::info!(
                "continuing to move cover '{}' by {:.1}% for {}ms",
                self.config.device_id,
                delta.abs(),
                travel.as_millis()
            );
            self.stop_timer = Some(StopTimer {
                at: now + travel,
                silent: end_stop,
            });
            return;
        }

        tracing::info!(
            "moving cover '{}' {} by {:.1}% for {}ms",
            self.config.device_id,
            direction.action(),
            delta.abs(),
            travel.as_millis()
        );
        if simulated {
            self.start_motion(direction, now, Some(travel), true);
        } else {
            self.pending_move = Some(PendingMove { direction, target });
            self.send(direction.action(), Followup::Move { direction });
        }
    }

    fn user_stop(&mut self) {
        if !self.online {
            if self.deferred_target.take().is_some() {
                tracing::info!("cover '{}' deferred move cancelled", self.config.device_id);
                self.publish();
            }
            return;
        }
        if self.cancel_recalibration() {
            tracing::warn!(
                "recalibration of cover '{}' stopped, position uncertain",
                self.config.device_id
            );
            self.publish();
        }
        self.stop(false, None);
    }

    /// Stops the motor, then optionally moves on to `then`.
    fn stop(&mut self, simulated: bool, then: Option<f64>) {
        self.stop_timer = None;
        self.refresh = None;
        if simulated {
            self.end_motion(Instant::now());
            if let Some(target) = then {
                self.move_to(target, true);
            }
            return;
        }
        if let Some(stop) = self.stopping.as_mut() {
            stop.then = then;
            return;
        }
        self.stopping = Some(PendingStop { then });
        self.send("STOP", Followup::Stop);
    }

    /// Drops what was planned for commands still in flight.
    fn abandon_pending(&mut self) {
        self.pending_move = None;
        if let Some(stop) = self.stopping.as_mut() {
            stop.then = None;
        }
    }

    fn recalibrate(&mut self, target: Option<f64>) {
        let target = match target {
            Some(target) if !target.is_finite() => {
                tracing::warn!(
                    "ignoring invalid recalibration target {target} for cover '{}'",
                    self.config.device_id
                );
                return;
            }
            Some(target) => target.clamp(OPEN, CLOSED),
            None => self.position.unwrap_or(OPEN),
        };

        if !self.online {
            self.uncertain = true;
            self.deferred_target = Some(target);
            self.publish();
            return;
        }

        if let Some(current) = self.recalibration_target.as_mut() {
            *current = target;
            tracing::info!(
                "changed recalibration target of cover '{}' to {target}%",
                self.config.device_id
            );
            self.publish();
            return;
        }

        let now = Instant::now();
        self.stop_timer = None;
        self.refresh = None;
        self.abandon_pending();
        if let Some(motion) = self.motion.take() {
            self.position = Some(motion.position_at(now));
        }

        let direction = if target < RECALIBRATION_THRESHOLD {
            Direction::Open
        } else {
            Direction::Close
        };
        self.uncertain = true;
        self.recalibration_target = Some(target);
        self.recalibration_epoch += 1;
        tracing::info!(
            "recalibrating cover '{}' towards {target}% via the {:?} end stop",
            self.config.device_id,
            direction
        );
        self.send(
            direction.action(),
            Followup::Recalibrate {
                epoch: self.recalibration_epoch,
                direction,
            },
        );
        self.publish();
    }

    fn cancel_recalibration(&mut self) -> bool {
        if self.recalibration_target.take().is_none() {
            return false;
        }
        self.recalibration_timer = None;
        self.recalibration_epoch += 1;
        self.uncertain = true;
        true
    }

    /// A received command during recalibration or with an unknown position
    /// is not tracked.
    fn intervenes(&mut self) -> bool {
        if self.cancel_recalibration() {
            tracing::warn!(
                "external intervention during recalibration of cover '{}', position uncertain",
                self.config.device_id
            );
            self.publish();
            return true;
        }
        self.uncertain
    }

    fn on_completion(&mut self, followup: Followup, result: Result<Ack>) {
        match (followup, result) {
            (Followup::Move { direction }, Ok(ack)) => {
                let Some(pending) = self.pending_move.take() else {
                    tracing::debug!("cover '{}' move was superseded", self.config.device_id);
                    return;
                };
                let Some(start) = self.position else {
                    return;
                };
                let end_stop = is_end_stop(pending.target);
                let travel = travel_time(
                    pending.target - start,
                    self.config.ms_per_percent(direction),
                    end_stop,
                );
                tracing::debug!(
                    "cover '{}' acknowledged after {}ms, heading for {}%",
                    self.config.device_id,
                    ack.latency.as_millis(),
                    pending.target
                );
                // a queued STOP ends this motion
                let run = self
                    .stopping
                    .is_none()
                    .then(|| travel.saturating_sub(ack.latency).max(MIN_RUN));
                self.start_motion(direction, ack.sent_at, run, end_stop);
            }
            (Followup::Move { direction }, Err(e)) => {
                tracing::error!(
                    "failed to send {} to cover '{}': {e}",
                    direction.action(),
                    self.config.device_id
                );
                self.pending_move = None;
                self.uncertain = true;
                self.publish();
            }
            (Followup::Stop, Ok(ack)) => {
                let then = self.stopping.take().and_then(|stop| stop.then);
                self.end_motion(ack.sent_at);
                if let Some(target) = then {
                    self.move_to(target, false);
                }
            }
            (Followup::Stop, Err(e)) => {
                tracing::error!(
                    "failed to stop cover '{}', position uncertain: {e}",
                    self.config.device_id
                );
                self.stopping = None;
                let was_moving = self.motion.is_some();
                self.end_motion(Instant::now());
                if was_moving {
                    self.uncertain = true;
                    self.publish();
                }
            }
            (Followup::Recalibrate { epoch, direction }, Ok(_)) => {
                if epoch == self.recalibration_epoch && self.recalibration_target.is_some() {
                    self.recalibration_timer = Some(RecalibrationTimer {
                        at: Instant::now() + self.config.full_travel(direction),
                        direction,
                    });
                }
            }
            (Followup::Recalibrate { epoch, .. }, Err(e)) => {
                if epoch == self.recalibration_epoch {
                    tracing::error!(
                        "recalibration of cover '{}' failed: {e}",
                        self.config.device_id
                    );
                    self.recalibration_target = None;
                    self.uncertain = true;
                    self.publish();
                }
            }
            (Followup::Simple { state }, Ok(_)) => {
                if let Some(state) = state {
                    self.set_simple(state);
                }
            }
            (Followup::Simple { .. }, Err(e)) => {
                tracing::error!(
                    "failed to send command to cover '{}': {e}",
                    self.config.device_id
                );
            }
        }
    }

    fn on_stop_timer(&mut self) {
        if let Some(timer) = self.stop_timer.take() {
            self.stop(timer.silent, None);
        }
    }

    fn on_recalibration_timer(&mut self) {
        let Some(timer) = self.recalibration_timer.take() else {
            return;
        };
        let Some(target) = self.recalibration_target.take() else {
            return;
        };
        tracing::info!("recalibration of cover '{}' finished", self.config.device_id);
        self.uncertain = false;
        self.set_position(timer.direction.end_stop());
        self.move_to(target, false);
    }

    fn refresh_position(&mut self) {
        match self.motion {
            Some(motion) => {
                self.position = Some(motion.position_at(Instant::now()));
                self.publish();
            }
            None => self.refresh = None,
        }
    }

    /// Tracks a motion started at `started_at`. Without `run` the motion lasts
    /// until the STOP in flight is acknowledged.
    fn start_motion(
        &mut self,
        direction: Direction,
        started_at: Instant,
        run: Option<Duration>,
        silent: bool,
    ) {
        if self.motion.is_some() || self.uncertain || self.recalibration_target.is_some() {
            tracing::debug!("cover '{}' not starting motion", self.config.device_id);
            return;
        }
        let Some(start_position) = self.position else {
            return;
        };

        self.motion = Some(Motion {
            direction,
            ms_per_percent: self.config.ms_per_percent(direction),
            started_at,
            start_position,
        });
        let now = Instant::now();
        self.stop_timer = run.map(|run| StopTimer {
            at: now + run,
            silent,
        });
        let mut refresh = tokio::time::interval_at(now + REFRESH_PERIOD, REFRESH_PERIOD);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.refresh = Some(refresh);
        if let Some(run) = run {
            tracing::debug!(
                "cover '{}' moving, stop timer in {}ms",
                self.config.device_id,
                run.as_millis()
            );
        }
        self.publish();
    }

    fn end_motion(&mut self, at: Instant) {
        self.stop_timer = None;
        self.refresh = None;
        if let Some(motion) = self.motion.take() {
            let position = motion.position_at(at);
            tracing::info!(
                "cover '{}' stopped at {position:.1}% after {}ms",
                self.config.device_id,
                at.saturating_duration_since(motion.started_at).as_millis()
            );
            self.set_position(position);
        }
    }

    fn current_position(&self, at: Instant) -> Option<f64> {
        self.motion
            .map_or(self.position, |motion| Some(motion.position_at(at)))
    }

    fn set_position(&mut self, position: f64) {
        self.position = Some(position.clamp(OPEN, CLOSED));
        self.publish();
    }

    fn set_simple(&mut self, state: SimpleState) {
        self.simple_state = Some(state);
        self.publish();
    }

    fn send(&mut self, action: &str, followup: Followup) {
        let completion = self.sink.send_command(&self.config.device_id, action);
        self.completions
            .push(completion.map(move |result| (followup, result)).boxed());
    }

    fn publish(&self) {
        let status = CoverStatus {
            advanced: self.config.is_advanced(),
            online: self.online,
            position: self.position,
            state: self.simple_state,
            moving: self.motion.map(|m| m.direction),
            uncertain: self.uncertain,
            recalibration_target: self.recalibration_target,
            deferred_target: self.deferred_target,
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
