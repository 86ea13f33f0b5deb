//! Link status and counters.

use std::time::SystemTime;

/// Process-wide status of one transceiver link.
///
/// Mutated only by the link engine; everyone else reads snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatus {
    /// True once the transceiver has identified itself.
    pub active: bool,
    /// Transceiver model from the banner line.
    pub model: String,
    /// Firmware version (`VER=`).
    pub version: String,
    /// Firmware revision (`REV=`).
    pub revision: String,
    /// Firmware build (`BUILD=`).
    pub build: String,
    /// Last time the transport was opened.
    pub last_opened: Option<SystemTime>,
    /// Last time a line was received.
    pub last_message: Option<SystemTime>,
    /// Last time a transport error occurred.
    pub last_error: Option<SystemTime>,
    /// Number of successfully opened sessions.
    pub session_count: u64,
    /// Number of received lines (keepalive replies excluded).
    pub message_count: u64,
    /// Number of commands accepted into the queue.
    pub command_count: u64,
    /// Number of commands acknowledged by the transceiver.
    pub confirm_count: u64,
    /// Number of transport errors.
    pub error_count: u64,
    /// Number of restarts caused by a dead link.
    pub dead_count: u64,
}
