//! Main [`RfLink`] client implementation.
//!
//! [`RfLink`] owns the link engine task. [`LinkHandle`] is the cheap, clonable
//! front end used by device drivers to queue commands and read the status.

use std::future::Future;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::commands::{Ack, CommandSink, DEFAULT_TIMEOUT};
use crate::engine::{Engine, Request};
use crate::error::{Error, Result};
use crate::event::{EventDispatcher, Subscription};
use crate::protocol::{
    DEFAULT_DELIMITER, SystemCommand, TextEncoding, device_command, expects_reply,
};
use crate::transport::{Connector, SerialConfig, SerialConnector};
use crate::types::LinkStatus;

/// Default delay before reopening a failed transport.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Default keepalive interval.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(10);

/// Lower bound for the retry delay and the keepalive interval.
pub const MIN_INTERVAL: Duration = Duration::from_secs(5);

/// Event channel capacity.
const EVENT_CAPACITY: usize = 256;

/// Link engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Delay before reopening after a failure.
    pub retry_delay: Duration,
    /// Keepalive interval. Three silent intervals mark the link dead.
    pub keepalive: Duration,
    /// How long the head command may wait for its acknowledgement.
    pub command_timeout: Duration,
    /// Incoming line delimiter.
    pub delimiter: String,
    /// Incoming text encoding.
    pub encoding: TextEncoding,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            keepalive: DEFAULT_KEEPALIVE,
            command_timeout: DEFAULT_TIMEOUT,
            delimiter: DEFAULT_DELIMITER.into(),
            encoding: TextEncoding::default(),
        }
    }
}

impl LinkConfig {
    /// Sets the retry delay, at least [`MIN_INTERVAL`].
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay.max(MIN_INTERVAL);
        self
    }

    /// Sets the keepalive interval, at least [`MIN_INTERVAL`].
    #[must_use]
    pub fn keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = interval.max(MIN_INTERVAL);
        self
    }

    /// Sets the acknowledgement timeout.
    #[must_use]
    pub const fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the incoming line delimiter.
    #[must_use]
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Sets the incoming text encoding.
    #[must_use]
    pub const fn encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// Clonable access to a running link.
///
/// Commands are queued synchronously when a method is called, so commands
/// reach the transceiver in call order even if the returned futures are
/// awaited in a different order.
#[derive(Clone)]
pub struct LinkHandle {
    requests: mpsc::UnboundedSender<Request>,
    status: watch::Receiver<LinkStatus>,
}

impl LinkHandle {
    /// Returns a snapshot of the link status.
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Returns true while the transceiver is identified and accepting commands.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.borrow().active
    }

    /// Returns a receiver notified on every status change.
    #[must_use]
    pub fn status_changes(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Queues a device command, e.g. `("NewKaku:00c142:1", "ON")`.
    pub fn send_command(
        &self,
        device_id: &str,
        action: &str,
    ) -> impl Future<Output = Result<Ack>> + Send + 'static {
        self.submit(device_command(device_id, action))
    }

    /// Queues a raw line, sent as given plus the terminator.
    pub fn send_raw(
        &self,
        line: impl Into<String>,
    ) -> impl Future<Output = Result<Ack>> + Send + 'static {
        self.submit(line.into())
    }

    /// Queues a transceiver command.
    ///
    /// `PING` is reserved for the keepalive and rejected.
    pub fn execute(
        &self,
        command: SystemCommand,
    ) -> impl Future<Output = Result<Ack>> + Send + 'static {
        let submitted = if command == SystemCommand::Ping {
            Err(Error::Protocol {
                message: "PING is reserved for the keepalive".into(),
            })
        } else {
            self.enqueue(command.encode())
        };
        Self::completion(submitted)
    }

    /// Drops the current session and reopens after the retry delay.
    pub fn restart(&self) -> Result<()> {
        self.requests
            .send(Request::Restart)
            .map_err(|_| Error::ChannelClosed)
    }

    fn submit(&self, line: String) -> impl Future<Output = Result<Ack>> + Send + 'static {
        Self::completion(self.enqueue(line))
    }

    fn enqueue(&self, line: String) -> Result<oneshot::Receiver<Result<Ack>>> {
        if !self.is_active() {
            tracing::debug!("link inactive, rejecting '{line}'");
            return Err(Error::Unavailable);
        }
        let (reply, completion) = oneshot::channel();
        let expects_reply = expects_reply(&line);
        self.requests
            .send(Request::Enqueue {
                line,
                expects_reply,
                reply,
            })
            .map_err(|_| Error::ChannelClosed)?;
        Ok(completion)
    }

    async fn completion(submitted: Result<oneshot::Receiver<Result<Ack>>>) -> Result<Ack> {
        submitted?.await.map_err(|_| Error::ChannelClosed)?
    }
}

impl CommandSink for LinkHandle {
    fn send_command(&self, device_id: &str, action: &str) -> BoxFuture<'static, Result<Ack>> {
        self.submit(device_command(device_id, action)).boxed()
    }
}

/// Client for an `RFLink` transceiver.
///
/// The engine runs on its own task between [`start`](Self::start) and
/// [`stop`](Self::stop) and keeps reopening the transport after failures.
pub struct RfLink<C> {
    engine: Option<Engine<C>>,
    task: Option<JoinHandle<Engine<C>>>,
    handle: LinkHandle,
    dispatcher: EventDispatcher,
}

impl RfLink<SerialConnector> {
    /// Creates a client for a serial port.
    ///
    /// # Arguments
    ///
    /// * `serial` - Port settings (e.g. "/dev/ttyACM0" at 57600 baud)
    /// * `config` - Link engine settings
    #[must_use]
    pub fn serial(serial: SerialConfig, config: LinkConfig) -> Self {
        Self::new(SerialConnector::new(serial), config)
    }
}

impl<C: Connector> RfLink<C> {
    /// Creates a client with the given connector. Nothing is opened yet.
    #[must_use]
    pub fn new(connector: C, config: LinkConfig) -> Self {
        let dispatcher = EventDispatcher::new(EVENT_CAPACITY);
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());
        let engine = Engine::new(
            connector,
            config,
            requests_rx,
            status_tx,
            dispatcher.clone(),
        );

        Self {
            engine: Some(engine),
            task: None,
            handle: LinkHandle {
                requests: requests_tx,
                status: status_rx,
            },
            dispatcher,
        }
    }

    /// Spawns the engine. Returns false if it is already running.
    pub fn start(&mut self) -> bool {
        match self.engine.take() {
            Some(engine) => {
                self.task = Some(tokio::spawn(engine.run()));
                true
            }
            None => false,
        }
    }

    /// Stops the engine, failing every queued command.
    ///
    /// The client can be started again afterwards.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        let (done, stopped) = oneshot::channel();
        if self.handle.requests.send(Request::Stop { done }).is_ok() {
            let _ = stopped.await;
        }

        let engine = task.await.map_err(|e| Error::Protocol {
            message: format!("engine task failed: {e}"),
        })?;
        self.engine = Some(engine);
        Ok(())
    }

    /// Returns true while the engine task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Returns a handle for queuing commands.
    #[must_use]
    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    /// Returns a snapshot of the link status.
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        self.handle.status()
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe()
    }
}

impl<C> Drop for RfLink<C> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::transport::mock::{MockConnector, MockDevice, init_tracing};

    async fn active_link() -> (RfLink<MockConnector>, MockConnector, MockDevice) {
        init_tracing();
        let connector = MockConnector::new();
        let mut device = connector.plug();
        let mut link = RfLink::new(connector.clone(), LinkConfig::default());
        let mut changes = link.handle().status_changes();
        assert!(link.start());
        device.handshake().await;
        changes.wait_for(|s| s.active).await.unwrap();
        (link, connector, device)
    }

    async fn next_telemetry(events: &mut Subscription) -> crate::types::RadioFrame {
        loop {
            if let Event::Telemetry(frame) = events.recv().await.unwrap() {
                return frame;
            }
        }
    }

    #[test]
    fn test_config_clamps_intervals() {
        let config = LinkConfig::default()
            .retry_delay(Duration::from_secs(1))
            .keepalive(Duration::from_secs(30));
        assert_eq!(config.retry_delay, MIN_INTERVAL);
        assert_eq!(config.keepalive, Duration::from_secs(30));
        assert_eq!(LinkConfig::default().retry_delay, DEFAULT_RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_activates_link() {
        let connector = MockConnector::new();
        let mut device = connector.plug();
        let mut link = RfLink::new(connector, LinkConfig::default());
        let mut events = link.subscribe();
        link.start();

        assert!(matches!(events.recv().await, Some(Event::Starting)));
        let Some(Event::Opened(status)) = events.recv().await else {
            panic!("expected opened event");
        };
        assert!(!status.active);
        assert_eq!(status.session_count, 1);

        device.handshake().await;
        let Some(Event::ActiveChanged(status)) = events.recv().await else {
            panic!("expected active event");
        };
        assert!(status.active);
        assert_eq!(status.model, "RFLink Gateway V1.1 - R46");
        assert_eq!(status.version, "1.1");
        assert_eq!(status.revision, "46");
        assert_eq!(status.build, "0c");
        assert!(link.handle().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_commands_before_active() {
        let connector = MockConnector::new();
        let _device = connector.plug();
        let link = RfLink::new(connector, LinkConfig::default());

        let result = link.handle().send_command("NewKaku:00c142:1", "ON").await;
        assert!(matches!(result, Err(Error::Unavailable)));
        assert_eq!(link.status().command_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_sent_one_at_a_time() {
        let (link, _connector, mut device) = active_link().await;
        let handle = link.handle();

        let first = handle.send_command("NewKaku:00c142:1", "ON");
        let second = handle.send_command("NewKaku:00c142:2", "OFF");
        let third = handle.send_command("BrelMotor:19a7d2", "DOWN");

        assert_eq!(device.recv().await.as_deref(), Some("10;NewKaku;00c142;1;ON;"));
        let early = tokio::time::timeout(Duration::from_millis(50), device.recv()).await;
        assert!(early.is_err(), "second command sent before first ack");

        device.send("20;02;OK;").await;
        assert_eq!(device.recv().await.as_deref(), Some("10;NewKaku;00c142;2;OFF;"));
        device.send("20;03;OK;").await;
        assert_eq!(device.recv().await.as_deref(), Some("10;BrelMotor;19a7d2;DOWN;"));
        device.send("20;04;OK;").await;

        assert!(first.await.is_ok());
        assert!(second.await.is_ok());
        assert!(third.await.is_ok());

        let status = link.status();
        assert_eq!(status.command_count, 3);
        assert_eq!(status.confirm_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_latency_accounts_for_write() {
        let (link, _connector, mut device) = active_link().await;
        let pending = link.handle().send_command("NewKaku:00c142:1", "ON");
        device.recv().await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        device.send("20;02;OK;").await;

        let ack = pending.await.unwrap();
        assert!(ack.payload.is_none());
        assert_eq!(ack.latency, Duration::from_millis(190));
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_unknown_fails_command() {
        let (link, _connector, mut device) = active_link().await;
        let pending = link.handle().send_raw("10;BOGUS;");
        device.recv().await;
        device.send("20;02;CMD UNKNOWN;").await;

        match pending.await {
            Err(Error::CommandUnknown { command }) => assert_eq!(command, "10;BOGUS;"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(link.status().confirm_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_version_ack_carries_fields() {
        let (link, _connector, mut device) = active_link().await;
        let pending = link.handle().execute(SystemCommand::Version);
        assert_eq!(device.recv().await.as_deref(), Some("10;VERSION;"));
        device.send("20;05;VER=1.2;REV=48;BUILD=0d;").await;

        let ack = pending.await.unwrap();
        assert_eq!(ack.payload.unwrap().get("rev"), Some("48"));
        assert_eq!(link.status().version, "1.2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_completes_without_reply() {
        let (link, _connector, mut device) = active_link().await;
        let reboot = link.handle().execute(SystemCommand::Reboot);
        let next = link.handle().send_command("NewKaku:00c142:1", "ON");

        assert_eq!(device.recv().await.as_deref(), Some("10;REBOOT;"));
        assert_eq!(device.recv().await.as_deref(), Some("10;NewKaku;00c142;1;ON;"));
        assert!(reboot.await.is_ok());

        device.send("20;02;OK;").await;
        assert!(next.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_is_reserved() {
        let (link, _connector, _device) = active_link().await;
        let result = link.handle().execute(SystemCommand::Ping).await;
        assert!(matches!(result, Err(Error::Protocol { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_timeout() {
        let (link, _connector, mut device) = active_link().await;
        let pending = link.handle().execute(SystemCommand::RtsShow);
        device.recv().await;

        let result = pending.await;
        assert!(matches!(result, Err(Error::Timeout { timeout_ms: 5000 })));
        assert!(link.handle().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_dispatched() {
        let (link, _connector, mut device) = active_link().await;
        let mut events = link.subscribe();

        device
            .send("20;2D;NewKaku;ID=00c142;SWITCH=1;CMD=ON;")
            .await;
        let frame = next_telemetry(&mut events).await;
        assert_eq!(frame.name, "NewKaku");
        assert_eq!(frame.packet_index, Some(0x2d));
        assert_eq!(frame.dispatch_key().as_deref(), Some("NewKaku:00c142:1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_counting() {
        let (link, _connector, mut device) = active_link().await;
        let mut events = link.subscribe();
        let before = link.status().message_count;

        device.send("20;06;PONG;").await;
        device.send("garbage").await;
        device.send("20;07;Oregon Temp;ID=0710;TEMP=00cf;").await;

        let frame = next_telemetry(&mut events).await;
        assert_eq!(frame.name, "Oregon Temp");
        // the pong is not counted, the malformed line is
        assert_eq!(link.status().message_count, before + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_and_unknown_nodes_ignored() {
        let (link, _connector, mut device) = active_link().await;
        let mut events = link.subscribe();
        let before = link.status().message_count;
        let pending = link.handle().send_command("NewKaku:00c142:1", "ON");
        assert_eq!(device.recv().await.as_deref(), Some("10;NewKaku;00c142;1;ON;"));

        device.send("10;01;OK;").await;
        device.send("11;02;OK;").await;
        device.send("30;03;Stray;ID=0001;").await;
        device.send("20;04;Oregon Temp;ID=0710;TEMP=00cf;").await;

        // nothing before the device line reaches subscribers
        match events.recv().await {
            Some(Event::Telemetry(frame)) => assert_eq!(frame.name, "Oregon Temp"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(link.status().message_count, before + 4);

        // only a node 20 reply completes the command
        assert_eq!(link.status().confirm_count, 0);
        device.send("20;05;OK;").await;
        assert!(pending.await.is_ok());
        assert_eq!(link.status().confirm_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_restarts() {
        init_tracing();
        let connector = MockConnector::new();
        // the version request is the only write that succeeds
        let mut device = connector.plug_with_write_budget(1);
        let mut link = RfLink::new(connector.clone(), LinkConfig::default());
        let mut events = link.subscribe();
        let mut changes = link.handle().status_changes();
        link.start();
        device.handshake().await;
        changes.wait_for(|s| s.active).await.unwrap();

        let result = link.handle().send_command("NewKaku:00c142:1", "ON").await;
        assert!(matches!(result, Err(Error::Io(_))));

        loop {
            if let Some(Event::Error { status, .. }) = events.recv().await {
                assert_eq!(status.error_count, 1);
                break;
            }
        }
        assert!(!link.handle().is_active());
        assert_eq!(connector.attempts(), 1);

        let _next = connector.plug();
        tokio::time::sleep(DEFAULT_RETRY_DELAY + Duration::from_secs(1)).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(link.status().session_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_retries() {
        let connector = MockConnector::new();
        let mut link = RfLink::new(
            connector.clone(),
            LinkConfig::default().retry_delay(Duration::from_secs(5)),
        );
        link.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(link.status().error_count, 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.attempts(), 2);
        assert!(link.status().last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_link_restarts() {
        let (link, connector, mut device) = active_link().await;

        // the device never answers the pings
        assert_eq!(device.recv().await, None);

        let status = link.status();
        assert_eq!(status.dead_count, 1);
        assert_eq!(status.error_count, 0);
        assert!(!status.active);
        assert_eq!(connector.attempts(), 1);

        let mut device = connector.plug();
        tokio::time::sleep(DEFAULT_RETRY_DELAY + Duration::from_secs(1)).await;
        assert_eq!(connector.attempts(), 2);
        device.handshake().await;
        let mut changes = link.handle().status_changes();
        changes.wait_for(|s| s.active).await.unwrap();
        assert_eq!(link.status().session_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_fails_queued_commands() {
        let (mut link, connector, mut device) = active_link().await;
        let handle = link.handle();
        let first = handle.send_command("NewKaku:00c142:1", "ON");
        let second = handle.send_command("NewKaku:00c142:2", "ON");
        device.recv().await;

        link.stop().await.unwrap();
        assert!(matches!(first.await, Err(Error::Stopping)));
        assert!(matches!(second.await, Err(Error::Stopping)));
        assert!(!link.is_running());
        assert!(!link.status().active);

        // stopped links can be started again
        let mut device = connector.plug();
        assert!(link.start());
        device.handshake().await;
        let mut changes = link.handle().status_changes();
        changes.wait_for(|s| s.active).await.unwrap();
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_fails_queued_commands() {
        let (link, _connector, mut device) = active_link().await;
        let handle = link.handle();
        let pending = handle.send_command("NewKaku:00c142:1", "ON");
        device.recv().await;

        handle.restart().unwrap();
        assert!(matches!(pending.await, Err(Error::Restarting)));
        assert_eq!(device.recv().await, None);
    }
}
