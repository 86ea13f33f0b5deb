//! Outbound command queue with acknowledgement correlation.
//!
//! The transceiver is half-duplex at the protocol level and its replies carry
//! no request id, so commands are strictly FIFO with at most one in flight.
//! A reply always belongs to the head of the queue.

use std::collections::VecDeque;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::types::Fields;

/// Added to the write time to compensate for serial write buffering.
pub const WRITE_LATENCY: Duration = Duration::from_millis(10);

/// Default acknowledgement timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Successful completion of a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    /// Decoded reply payload for data-carrying acknowledgements.
    pub payload: Option<Fields>,
    /// When the command went out on the wire.
    pub sent_at: Instant,
    /// Time between transmission and acknowledgement.
    pub latency: Duration,
}

/// Anything that can deliver device commands to the transceiver.
///
/// Implementations must enqueue synchronously, before the returned future is
/// first polled, so that submission order is transmission order.
pub trait CommandSink: Send + Sync + 'static {
    /// Sends `action` to the device with the given id.
    fn send_command(&self, device_id: &str, action: &str) -> BoxFuture<'static, Result<Ack>>;
}

/// One outstanding request.
#[derive(Debug)]
pub(crate) struct PendingCommand {
    line: String,
    expects_reply: bool,
    reply: oneshot::Sender<Result<Ack>>,
    sent_at: Option<Instant>,
    deadline: Option<Instant>,
}

/// FIFO of pending commands.
#[derive(Debug)]
pub(crate) struct CommandQueue {
    entries: VecDeque<PendingCommand>,
    timeout: Duration,
}

impl CommandQueue {
    pub(crate) const fn new(timeout: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            timeout,
        }
    }

    /// Appends a command.
    pub(crate) fn push(
        &mut self,
        line: String,
        expects_reply: bool,
        reply: oneshot::Sender<Result<Ack>>,
    ) {
        self.entries.push_back(PendingCommand {
            line,
            expects_reply,
            reply,
            sent_at: None,
            deadline: None,
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if the head has been transmitted and awaits completion.
    pub(crate) fn has_in_flight(&self) -> bool {
        self.entries.front().is_some_and(|e| e.sent_at.is_some())
    }

    /// Returns the line of the command in flight.
    pub(crate) fn in_flight_line(&self) -> Option<&str> {
        self.entries
            .front()
            .filter(|e| e.sent_at.is_some())
            .map(|e| e.line.as_str())
    }

    /// Returns the head line if it still has to be transmitted.
    pub(crate) fn next_unsent(&self) -> Option<(&str, bool)> {
        self.entries
            .front()
            .filter(|e| e.sent_at.is_none())
            .map(|e| (e.line.as_str(), e.expects_reply))
    }

    /// Marks the head as transmitted at `now`.
    pub(crate) fn mark_sent(&mut self, now: Instant) {
        let timeout = self.timeout;
        if let Some(head) = self.entries.front_mut() {
            head.sent_at = Some(now + WRITE_LATENCY);
            head.deadline = Some(now + timeout);
        }
    }

    /// Acknowledgement deadline of the command in flight.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.entries.front().and_then(|e| e.deadline)
    }

    /// Completes the command in flight.
    ///
    /// Returns false if nothing was in flight.
    pub(crate) fn complete(&mut self, outcome: Result<Option<Fields>>, now: Instant) -> bool {
        if !self.has_in_flight() {
            return false;
        }
        let Some(head) = self.entries.pop_front() else {
            return false;
        };
        let sent_at = head.sent_at.unwrap_or(now);
        let latency = now.saturating_duration_since(sent_at);
        tracing::debug!(
            "command '{}' completed after {}ms: {}",
            head.line,
            latency.as_millis(),
            if outcome.is_ok() { "ok" } else { "failed" }
        );
        let result = outcome.map(|payload| Ack {
            payload,
            sent_at,
            latency,
        });
        // the caller may have lost interest
        let _ = head.reply.send(result);
        true
    }

    /// Completes the command in flight with a timeout error.
    pub(crate) fn expire(&mut self, now: Instant) -> bool {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        self.complete(Err(Error::Timeout { timeout_ms }), now)
    }

    /// Fails every queued command.
    pub(crate) fn fail_all(&mut self, error: impl Fn() -> Error) {
        for entry in self.entries.drain(..) {
            let _ = entry.reply.send(Err(error()));
        }
    }
}
