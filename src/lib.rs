//! # rflink-gateway
//!
//! Async link engine and device drivers for `RFLink` 433/868 MHz radio
//! transceivers.
//!
//! The library keeps a serial link to the transceiver alive, decodes its
//! line protocol and serializes commands with acknowledgement correlation.
//! On top of that, covers (blinds, shutters, awnings) get a motion
//! controller that reconstructs their position from command timing.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Automatic reopen with backoff, keepalive and dead-link detection
//! - Strictly ordered command queue, one command in flight
//! - Event-driven telemetry and link state notifications
//! - Position tracking for covers driven by plain UP/DOWN/STOP remotes
//!
//! ## Quick Start
//!
//! ```no_run
//! use rflink_gateway::{Event, LinkConfig, RfLink, SerialConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rflink_gateway::Error> {
//!     let mut link = RfLink::serial(SerialConfig::new("/dev/ttyACM0"), LinkConfig::default());
//!     let mut events = link.subscribe();
//!     link.start();
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             Event::ActiveChanged(status) if status.active => {
//!                 println!("Connected to: {} {}", status.model, status.version);
//!                 link.handle().send_command("NewKaku:00c142:1", "ON").await?;
//!             }
//!             Event::Telemetry(frame) => println!("{}: {:?}", frame.name, frame.fields),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Line framing, parsing, reply classification and commands
//! - [`types`] - Link status, telemetry frames and fields
//! - [`transport`] - Transport implementations (currently USB/Serial)
//! - [`event`] - Async event system for link notifications
//! - [`commands`] - Acknowledgements and the command sink seam
//! - [`client`] - High-level [`RfLink`] client and [`LinkHandle`]
//! - [`cover`] - Cover motion controller
//! - [`devices`] - Dispatch of telemetry to device drivers

pub mod client;
pub mod commands;
pub mod cover;
pub mod devices;
mod engine;
pub mod error;
pub mod event;
pub mod protocol;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{LinkConfig, LinkHandle, RfLink};
pub use commands::{Ack, CommandSink};
pub use cover::{CoverCommand, CoverConfig, CoverHandle, CoverStatus};
pub use devices::{DeviceDriver, DeviceRegistry};
pub use error::{Error, FrameError, Result};
pub use event::{Event, EventDispatcher, Subscription};
pub use protocol::{DebugMode, SystemCommand, TextEncoding};
pub use transport::{SerialConfig, SerialConnector, serial::list_ports};
pub use types::{Fields, LinkStatus, RadioFrame};
