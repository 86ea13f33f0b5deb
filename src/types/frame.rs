//! Decoded telemetry frames.

use std::time::SystemTime;

use crate::types::Fields;

/// A decoded telemetry line received from a radio device.
///
/// `name` is the protocol name from the first field (e.g. `Oregon TempHygro`),
/// `fields` holds the remaining lower-cased `KEY=VALUE` pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioFrame {
    /// Protocol / device family name.
    pub name: String,
    /// Decoded fields.
    pub fields: Fields,
    /// Node identifier of the line (`20` for device data).
    pub node: String,
    /// Packet index as sent by the transceiver.
    pub packet_index: Option<u8>,
    /// Receipt time.
    pub received_at: SystemTime,
}

impl RadioFrame {
    /// Returns the device id (`ID=` field).
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.fields.get("id")
    }

    /// Returns the switch/channel (`SWITCH=` field).
    #[must_use]
    pub fn switch(&self) -> Option<&str> {
        self.fields.get("switch")
    }

    /// Returns the command carried by the frame (`CMD=` field).
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.fields.get("cmd")
    }

    /// Returns true for transceiver debug output (`DEBUG` frames).
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.name == "DEBUG"
    }

    /// Key used to route the frame to a device: `name:id` or `name:id:switch`.
    #[must_use]
    pub fn dispatch_key(&self) -> Option<String> {
        let id = self.id()?;
        Some(match self.switch() {
            Some(switch) => format!("{}:{id}:{switch}", self.name),
            None => format!("{}:{id}", self.name),
        })
    }
}
