//! The link session engine.
//!
//! One task owns the transport, the line decoder, the command queue and the
//! link status. Everything that changes link state happens on that task:
//!
//! ```text
//! Closed -> Opening -> AwaitingIdentity -> Active
//!              ^              |               |
//!              +-- RetryPending <-------------+  (transport error, dead link, restart)
//! ```

use std::io;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::client::LinkConfig;
use crate::commands::{Ack, CommandQueue};
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::protocol::{
    Line, LineDecoder, Reply, SystemCommand, classify, encode_line, parse_line, parse_model,
};
use crate::transport::{BoxWriter, Connection, Connector};
use crate::types::{Fields, LinkStatus};

/// Size of the read buffer.
const READ_BUFFER_SIZE: usize = 1024;

/// Silence of this many keepalive intervals marks the link as dead.
const DEAD_AFTER_INTERVALS: u32 = 3;

/// Requests sent from handles to the engine.
pub(crate) enum Request {
    /// Queue a command line.
    Enqueue {
        line: String,
        expects_reply: bool,
        reply: oneshot::Sender<Result<Ack>>,
    },
    /// Drop the session and reopen after the retry delay.
    Restart,
    /// Shut down for good.
    Stop { done: oneshot::Sender<()> },
}

/// Why a session ended.
enum Exit {
    Restart,
    Stop(Option<oneshot::Sender<()>>),
}

pub(crate) struct Engine<C> {
    connector: C,
    config: LinkConfig,
    requests: mpsc::UnboundedReceiver<Request>,
    status: watch::Sender<LinkStatus>,
    dispatcher: EventDispatcher,
    queue: CommandQueue,
    last_seen: Instant,
}

impl<C: Connector> Engine<C> {
    pub(crate) fn new(
        connector: C,
        config: LinkConfig,
        requests: mpsc::UnboundedReceiver<Request>,
        status: watch::Sender<LinkStatus>,
        dispatcher: EventDispatcher,
    ) -> Self {
        let queue = CommandQueue::new(config.command_timeout);
        Self {
            connector,
            config,
            requests,
            status,
            dispatcher,
            queue,
            last_seen: Instant::now(),
        }
    }

    /// Runs sessions until stopped, then hands the engine back.
    pub(crate) async fn run(mut self) -> Self {
        loop {
            tracing::info!("starting rflink interface on {}", self.connector.describe());
            self.dispatcher.dispatch(Event::Starting);

            let exit = match self.connector.open().await {
                Ok(connection) => self.session(connection).await,
                Err(e) => {
                    tracing::error!("failed to open {}: {e}", self.connector.describe());
                    self.record_error(&e);
                    Exit::Restart
                }
            };

            match exit {
                Exit::Stop(done) => {
                    self.shutdown(|| Error::Stopping);
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                    return self;
                }
                Exit::Restart => {
                    self.shutdown(|| Error::Restarting);
                    if !self.wait_retry().await {
                        return self;
                    }
                }
            }
        }
    }

    async fn session(&mut self, connection: Connection) -> Exit {
        let Connection {
            mut reader,
            mut writer,
        } = connection;

        let opened_at = SystemTime::now();
        self.update(|s| {
            s.last_opened = Some(opened_at);
            s.session_count += 1;
        });
        self.last_seen = Instant::now();
        tracing::info!("rflink port {} successfully opened", self.connector.describe());
        self.dispatcher.dispatch(Event::Opened(self.snapshot()));

        let mut decoder = LineDecoder::new(&self.config.delimiter, self.config.encoding);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let period = self.config.keepalive;
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            let deadline = self.queue.deadline();
            let step = tokio::select! {
                request = self.requests.recv() => self.on_request(request, &mut writer).await,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => Err(Error::Io(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "serial port closed",
                    ))),
                    Ok(n) => {
                        tracing::trace!("received {} bytes", n);
                        decoder.feed(&buf[..n]);
                        self.drain_lines(&mut decoder, &mut writer).await.map(|()| None)
                    }
                    Err(e) => Err(Error::Io(e)),
                },
                _ = keepalive.tick() => self.on_keepalive(&mut writer).await,
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    tracing::warn!(
                        "no acknowledgement for '{}'",
                        self.queue.in_flight_line().unwrap_or_default()
                    );
                    self.queue.expire(Instant::now());
                    self.pump(&mut writer).await.map(|()| None)
                }
            };

            match step {
                Ok(None) => {}
                Ok(Some(exit)) => break exit,
                Err(e) => {
                    tracing::error!("error on rflink port {}: {e}", self.connector.describe());
                    self.transport_failure(&e);
                    break Exit::Restart;
                }
            }
        };

        if matches!(exit, Exit::Stop(_)) {
            // close-time errors are irrelevant
            let _ = writer.shutdown().await;
        }
        drop(reader);
        drop(writer);
        self.set_active(false);
        tracing::info!("rflink port {} closed", self.connector.describe());
        self.dispatcher.dispatch(Event::Closed(self.snapshot()));
        exit
    }

    async fn on_request(
        &mut self,
        request: Option<Request>,
        writer: &mut BoxWriter,
    ) -> Result<Option<Exit>> {
        match request {
            None => Ok(Some(Exit::Stop(None))),
            Some(Request::Stop { done }) => Ok(Some(Exit::Stop(Some(done)))),
            Some(Request::Restart) => {
                tracing::info!("restart requested");
                Ok(Some(Exit::Restart))
            }
            Some(Request::Enqueue {
                line,
                expects_reply,
                reply,
            }) => {
                if !self.is_active() {
                    let _ = reply.send(Err(Error::Unavailable));
                    return Ok(None);
                }
                self.update(|s| s.command_count += 1);
                self.queue.push(line, expects_reply, reply);
                tracing::trace!("{} command(s) queued", self.queue.len());
                self.pump(writer).await.map(|()| None)
            }
        }
    }

    /// Transmits queued commands while nothing is in flight.
    async fn pump(&mut self, writer: &mut BoxWriter) -> Result<()> {
        loop {
            let Some((frame, expects_reply)) = self
                .queue
                .next_unsent()
                .map(|(line, expects_reply)| (encode_line(line), expects_reply))
            else {
                return Ok(());
            };

            self.queue.mark_sent(Instant::now());
            tracing::debug!("send: {}", String::from_utf8_lossy(&frame).trim_end());
            write_frame(writer, &frame).await?;

            if expects_reply {
                return Ok(());
            }
            // no acknowledgement will ever come
            self.queue.complete(Ok(None), Instant::now());
        }
    }

    async fn drain_lines(
        &mut self,
        decoder: &mut LineDecoder,
        writer: &mut BoxWriter,
    ) -> Result<()> {
        loop {
            match decoder.decode() {
                Ok(Some(line)) => self.handle_line(&line, writer).await?,
                Ok(None) => break,
                Err(e) => tracing::warn!("discarding input: {e}"),
            }
        }
        self.pump(writer).await
    }

    async fn handle_line(&mut self, raw: &str, writer: &mut BoxWriter) -> Result<()> {
        let raw = raw.trim_matches(|c: char| c == '\r' || c == '\n');
        if raw.is_empty() {
            return Ok(());
        }
        tracing::debug!("recv: {raw}");

        let received_at = SystemTime::now();
        self.last_seen = Instant::now();
        self.update(|s| {
            s.message_count += 1;
            s.last_message = Some(received_at);
        });

        let line = match parse_line(raw) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("discarding malformed line '{raw}': {e}");
                return Ok(());
            }
        };

        if !self.is_active() {
            return self.identify(&line, writer).await;
        }

        match line.node.as_str() {
            "10" | "11" => {}
            "20" => self.on_device_line(line, received_at),
            _ => tracing::warn!("unknown message type received: '{raw}'"),
        }
        Ok(())
    }

    /// Startup phase: wait for the banner and the version reply.
    async fn identify(&mut self, line: &Line, writer: &mut BoxWriter) -> Result<()> {
        if line.node == "20" && line.packet_index == Some(0) {
            let model = parse_model(line.first());
            tracing::info!("transceiver identified as '{model}'");
            self.update(|s| s.model = model);
            write_frame(writer, &encode_line(&SystemCommand::Version.encode())).await?;
        }
        if line.first_token() == "VER" {
            self.apply_version(&line.fields());
            self.set_active(true);
        }
        Ok(())
    }

    fn on_device_line(&mut self, line: Line, received_at: SystemTime) {
        match classify(&line) {
            Reply::Pong => {
                // keepalive traffic is not counted
                self.update(|s| s.message_count = s.message_count.saturating_sub(1));
            }
            Reply::Telemetry => {
                let frame = line.into_frame(received_at);
                self.dispatcher.dispatch(Event::Telemetry(frame));
            }
            Reply::Ok => self.acknowledge(Ok(None)),
            Reply::CommandUnknown => {
                let command = self.queue.in_flight_line().unwrap_or_default().to_owned();
                self.acknowledge(Err(Error::CommandUnknown { command }));
            }
            Reply::Ack { token, fields } => {
                if token == "VER" {
                    self.apply_version(&fields);
                }
                self.acknowledge(Ok(Some(fields)));
            }
        }
    }

    fn acknowledge(&mut self, outcome: Result<Option<Fields>>) {
        let success = outcome.is_ok();
        if self.queue.complete(outcome, Instant::now()) {
            if success {
                self.update(|s| s.confirm_count += 1);
            }
        } else {
            tracing::debug!("reply without command in flight ignored");
        }
    }

    async fn on_keepalive(&mut self, writer: &mut BoxWriter) -> Result<Option<Exit>> {
        if self.last_seen.elapsed() > self.config.keepalive * DEAD_AFTER_INTERVALS {
            tracing::warn!("connection appears to be dead, restarting");
            self.update(|s| s.dead_count += 1);
            return Ok(Some(Exit::Restart));
        }
        let probe = if self.is_active() {
            SystemCommand::Ping
        } else {
            SystemCommand::Version
        };
        write_frame(writer, &encode_line(&probe.encode())).await?;
        Ok(None)
    }

    /// Waits out the retry delay. Returns false if stopped meanwhile.
    async fn wait_retry(&mut self) -> bool {
        tracing::info!(
            "retrying to open {} in {} second(s)",
            self.connector.describe(),
            self.config.retry_delay.as_secs()
        );
        let retry = tokio::time::sleep(self.config.retry_delay);
        tokio::pin!(retry);
        loop {
            tokio::select! {
                () = &mut retry => return true,
                request = self.requests.recv() => match request {
                    None => return false,
                    Some(Request::Stop { done }) => {
                        let _ = done.send(());
                        return false;
                    }
                    Some(Request::Restart) => {}
                    Some(Request::Enqueue { reply, .. }) => {
                        let _ = reply.send(Err(Error::Unavailable));
                    }
                },
            }
        }
    }

    fn transport_failure(&mut self, error: &Error) {
        if self.queue.has_in_flight() {
            let kind = match error {
                Error::Io(e) => e.kind(),
                _ => io::ErrorKind::Other,
            };
            let fatal = Error::Io(io::Error::new(kind, error.to_string()));
            self.queue.complete(Err(fatal), Instant::now());
        }
        self.record_error(error);
    }

    fn record_error(&mut self, error: &Error) {
        let now = SystemTime::now();
        self.update(|s| {
            s.error_count += 1;
            s.last_error = Some(now);
        });
        self.dispatcher.dispatch(Event::Error {
            message: error.to_string(),
            status: self.snapshot(),
        });
    }

    fn shutdown(&mut self, error: impl Fn() -> Error) {
        self.set_active(false);
        self.queue.fail_all(error);
        self.dispatcher.dispatch(Event::Stopped(self.snapshot()));
    }

    fn apply_version(&self, fields: &Fields) {
        let version = fields.get("ver").unwrap_or_default().to_owned();
        let revision = fields.get("rev").unwrap_or_default().to_owned();
        let build = fields.get("build").unwrap_or_default().to_owned();
        tracing::debug!("firmware version {version} revision {revision} build {build}");
        self.update(|s| {
            s.version = version;
            s.revision = revision;
            s.build = build;
        });
    }

    fn set_active(&self, active: bool) {
        if self.is_active() != active {
            self.update(|s| s.active = active);
            tracing::info!("rflink link {}", if active { "active" } else { "inactive" });
            self.dispatcher.dispatch(Event::ActiveChanged(self.snapshot()));
        }
    }

    fn is_active(&self) -> bool {
        self.status.borrow().active
    }

    fn snapshot(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    fn update(&self, modify: impl FnOnce(&mut LinkStatus)) {
        self.status.send_modify(modify);
    }
}

async fn write_frame(writer: &mut BoxWriter, frame: &Bytes) -> Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
