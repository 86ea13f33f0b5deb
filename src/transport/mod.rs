//! Transport layer for RFLink communication.
//!
//! The link engine reopens its transport after every failure, so transports
//! are described by a [`Connector`] that produces a fresh [`Connection`] on
//! each attempt. Currently only USB/Serial is implemented.

#[cfg(test)]
pub(crate) mod mock;
pub mod serial;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Reading half of an open transport.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writing half of an open transport.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open duplex byte stream to the transceiver.
pub struct Connection {
    /// Incoming bytes.
    pub reader: BoxReader,
    /// Outgoing bytes.
    pub writer: BoxWriter,
}

impl Connection {
    /// Splits any duplex stream into a connection.
    pub fn split<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Trait for transport implementations.
pub trait Connector: Send + 'static {
    /// Opens the transport in non-blocking mode.
    fn open(&mut self) -> BoxFuture<'_, Result<Connection>>;

    /// Human readable name of the endpoint, used in logs.
    fn describe(&self) -> String;
}

pub use serial::{SerialConfig, SerialConnector};
