//! In-memory transceiver used by the tests.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::{
    AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};

use crate::error::{Error, Result};
use crate::transport::{Connection, Connector};

pub(crate) const BANNER: &str = "20;00;Nodo RadioFrequencyLink - RFLink Gateway V1.1 - R46;";
pub(crate) const VERSION: &str = "20;01;VER=1.1;REV=46;BUILD=0c;";

/// Routes log output of a test through the test harness, filtered by `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct MockState {
    pending: VecDeque<(DuplexStream, Option<usize>)>,
    attempts: usize,
}

/// Connector handing out duplex streams prepared with [`MockConnector::plug`].
///
/// With nothing plugged in, `open` fails like a missing device.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Prepares the stream returned by the next `open`.
    pub(crate) fn plug(&self) -> MockDevice {
        self.plug_inner(None)
    }

    /// Like [`plug`](Self::plug), but every write after the first `writes`
    /// fails with a broken pipe.
    pub(crate) fn plug_with_write_budget(&self, writes: usize) -> MockDevice {
        self.plug_inner(Some(writes))
    }

    fn plug_inner(&self, budget: Option<usize>) -> MockDevice {
        let (engine_side, device_side) = tokio::io::duplex(4096);
        self.state
            .lock()
            .unwrap()
            .pending
            .push_back((engine_side, budget));
        let (reader, writer) = tokio::io::split(device_side);
        MockDevice {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Number of `open` calls so far.
    pub(crate) fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }
}

impl Connector for MockConnector {
    fn open(&mut self) -> BoxFuture<'_, Result<Connection>> {
        let stream = {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;
            state.pending.pop_front()
        };
        async move {
            let (stream, budget) = stream.ok_or_else(|| {
                Error::Io(io::Error::new(io::ErrorKind::NotFound, "no device plugged"))
            })?;
            Ok(match budget {
                None => Connection::split(stream),
                Some(remaining) => {
                    let (reader, writer) = tokio::io::split(stream);
                    Connection {
                        reader: Box::new(reader),
                        writer: Box::new(BudgetWriter {
                            inner: writer,
                            remaining,
                        }),
                    }
                }
            })
        }
        .boxed()
    }

    fn describe(&self) -> String {
        "mock".into()
    }
}

/// Writer failing once its write budget is used up.
struct BudgetWriter {
    inner: WriteHalf<DuplexStream>,
    remaining: usize,
}

impl AsyncWrite for BudgetWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.remaining == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device unplugged",
            )));
        }
        self.remaining -= 1;
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// The transceiver end of a mock connection.
pub(crate) struct MockDevice {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl MockDevice {
    /// Sends one line to the engine.
    pub(crate) async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\r\n").await.unwrap();
    }

    /// Receives the next line, `None` once the engine closed the stream.
    pub(crate) async fn recv_any(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line).await {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end().to_owned()),
        }
    }

    /// Receives the next line that is not a keepalive ping.
    pub(crate) async fn recv(&mut self) -> Option<String> {
        loop {
            let line = self.recv_any().await?;
            if line != "10;PING;" {
                return Some(line);
            }
        }
    }

    /// Plays the startup banner and version exchange.
    pub(crate) async fn handshake(&mut self) {
        self.send(BANNER).await;
        assert_eq!(self.recv().await.as_deref(), Some("10;VERSION;"));
        self.send(VERSION).await;
    }
}
