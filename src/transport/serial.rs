//! Serial/USB transport implementation.
//!
//! This module opens the serial port an RFLink transceiver is attached to.

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_serial::SerialPortBuilderExt;

pub use tokio_serial::{DataBits, Parity, StopBits};

use crate::error::{Error, Result};
use crate::transport::{Connection, Connector};

/// Default baud rate for RFLink transceivers.
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyACM0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits.
    pub data_bits: DataBits,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Parity.
    pub parity: Parity,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings (57600/8/1/none).
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the data bits.
    #[must_use]
    pub const fn data_bits(mut self, bits: DataBits) -> Self {
        self.data_bits = bits;
        self
    }

    /// Sets the stop bits.
    #[must_use]
    pub const fn stop_bits(mut self, bits: StopBits) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Sets the parity.
    #[must_use]
    pub const fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }
}

/// Opens the configured serial port on every connection attempt.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    /// Creates a connector for the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SerialConfig {
        &self.config
    }
}

impl Connector for SerialConnector {
    fn open(&mut self) -> BoxFuture<'_, Result<Connection>> {
        async move {
            tracing::info!("opening serial port: {}", self.config.port);

            let stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .data_bits(self.config.data_bits)
                .stop_bits(self.config.stop_bits)
                .parity(self.config.parity)
                .open_native_async()
                .map_err(Error::Serial)?;

            Ok(Connection::split(stream))
        }
        .boxed()
    }

    fn describe(&self) -> String {
        self.config.port.clone()
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
