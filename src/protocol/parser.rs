//! Line codec for the RFLink text protocol.
//!
//! Inbound format:
//! ```text
//! <NODE>;<PACKET-INDEX hex>;<FIELD>;<FIELD>;...
//! ```
//! The first field of a device line is the protocol name, the rest are
//! `KEY=VALUE` pairs or bare tokens.

use std::time::SystemTime;

use crate::error::FrameError;
use crate::types::{Fields, RadioFrame};

/// Minimum number of `;`-separated elements of a valid line.
pub const MIN_ELEMENTS: usize = 3;

/// Models shorter than this are replaced by the raw banner text.
const MIN_MODEL_LEN: usize = 6;

/// A line split into its protocol parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Two character node identifier (`10`, `11`, `20`).
    pub node: String,
    /// Packet index, `None` if it is not valid hex.
    pub packet_index: Option<u8>,
    /// Remaining raw elements, including the empty one after a trailing `;`.
    pub elements: Vec<String>,
}

impl Line {
    /// Returns the first element, or an empty string.
    #[must_use]
    pub fn first(&self) -> &str {
        self.elements.first().map_or("", String::as_str)
    }

    /// Returns the first token of the first element (text before `=`).
    #[must_use]
    pub fn first_token(&self) -> &str {
        let first = self.first();
        first.split_once('=').map_or(first, |(key, _)| key)
    }

    /// Decodes all elements as fields.
    #[must_use]
    pub fn fields(&self) -> Fields {
        Fields::decompose(&self.elements)
    }

    /// Turns a device line into a telemetry frame.
    ///
    /// The first element becomes the frame name, the rest are decoded.
    #[must_use]
    pub fn into_frame(self, received_at: SystemTime) -> RadioFrame {
        let mut elements = self.elements.into_iter();
        let name = elements.next().unwrap_or_default();
        RadioFrame {
            name,
            fields: Fields::decompose(elements),
            node: self.node,
            packet_index: self.packet_index,
            received_at,
        }
    }
}

/// Splits a raw line into node, packet index and elements.
///
/// # Errors
///
/// Returns [`FrameError::TooFewFields`] if the line has fewer than
/// [`MIN_ELEMENTS`] elements.
pub fn parse_line(line: &str) -> Result<Line, FrameError> {
    let mut elements = line.split(';');
    let count = line.split(';').count();
    if count < MIN_ELEMENTS {
        return Err(FrameError::TooFewFields(count));
    }

    let node_raw = elements.next().unwrap_or_default();
    let skip = node_raw.chars().count().saturating_sub(2);
    let node: String = node_raw.chars().skip(skip).collect();
    let packet_index = elements
        .next()
        .and_then(|p| u8::from_str_radix(p.trim(), 16).ok());

    Ok(Line {
        node,
        packet_index,
        elements: elements.map(str::to_owned).collect(),
    })
}

/// Extracts the transceiver model from the banner element.
///
/// `Nodo RadioFrequencyLink - RFLink Gateway V1.1 - R46` yields
/// `RFLink Gateway V1.1 - R46`.
#[must_use]
pub fn parse_model(banner: &str) -> String {
    let model = banner
        .split_once('-')
        .map_or(banner, |(_, rest)| rest)
        .trim();
    if model.chars().count() < MIN_MODEL_LEN {
        banner.to_owned()
    } else {
        model.to_owned()
    }
}
