//! Protocol definitions for RFLink communication.
//!
//! This module contains the text protocol pieces:
//! - Line framing
//! - Line parsing and field decoding
//! - Reply classification
//! - Outbound commands

pub mod command;
pub mod frame;
pub mod parser;
pub mod reply;

pub use command::{DebugMode, SystemCommand, device_command, encode_structured, expects_reply};
pub use frame::{DEFAULT_DELIMITER, LineDecoder, TextEncoding, encode as encode_line};
pub use parser::{Line, parse_line, parse_model};
pub use reply::{Reply, classify};
