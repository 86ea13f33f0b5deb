//! Outbound commands for the RFLink protocol.
//!
//! Structured commands are sent as `10;<COMMAND>;`. Device commands embed the
//! device id, e.g. `10;NewKaku;00c142;1;ON;`.

/// Node used for all commands sent to the transceiver.
pub const COMMAND_NODE: &str = "10";

/// Debug output flavours of the transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugMode {
    /// Raw pulse output for decoded packets (`RFDEBUG`).
    Rf,
    /// Raw pulse output for undecoded packets (`RFUDEBUG`).
    Undecoded,
    /// Compact pulse output (`QRFDEBUG`).
    Quick,
}

impl DebugMode {
    /// Returns the protocol keyword.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Rf => "RFDEBUG",
            Self::Undecoded => "RFUDEBUG",
            Self::Quick => "QRFDEBUG",
        }
    }
}

/// Commands addressed to the transceiver itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemCommand {
    /// Keepalive probe, answered with `PONG`.
    Ping,
    /// Requests firmware version.
    Version,
    /// Reboots the transceiver. Never acknowledged.
    Reboot,
    /// Enables or disables debug output.
    Debug { mode: DebugMode, enabled: bool },
    /// Toggles tri-state signal inversion.
    TriStateInvert,
    /// Clears all RTS records.
    RtsClean,
    /// Clears one RTS record.
    RtsRecClean(u8),
    /// Dumps the RTS record table.
    RtsShow,
    /// Toggles RTS signal inversion.
    RtsInvert,
    /// Toggles long RTS transmissions.
    RtsLongTx,
}

impl SystemCommand {
    /// Returns the command body without node and separators.
    #[must_use]
    pub fn body(&self) -> String {
        match self {
            Self::Ping => "PING".into(),
            Self::Version => "VERSION".into(),
            Self::Reboot => "REBOOT".into(),
            Self::Debug { mode, enabled } => {
                format!("{}={}", mode.keyword(), if *enabled { "ON" } else { "OFF" })
            }
            Self::TriStateInvert => "TRISTATEINVERT".into(),
            Self::RtsClean => "RTSCLEAN".into(),
            Self::RtsRecClean(record) => format!("RTSRECCLEAN={record}"),
            Self::RtsShow => "RTSSHOW".into(),
            Self::RtsInvert => "RTSINVERT".into(),
            Self::RtsLongTx => "RTSLONGTX".into(),
        }
    }

    /// Encodes the command as a wire line (without terminator).
    #[must_use]
    pub fn encode(&self) -> String {
        encode_structured(&self.body())
    }
}

/// Wraps a command body as `10;<BODY>;`.
#[must_use]
pub fn encode_structured(body: &str) -> String {
    format!("{COMMAND_NODE};{body};")
}

/// Encodes a command for a device.
///
/// The device id uses `Protocol:ID[:SWITCH]` notation, its parts become
/// separate elements: `NewKaku:00c142:1` + `ON` gives `10;NewKaku;00c142;1;ON;`.
#[must_use]
pub fn device_command(device_id: &str, action: &str) -> String {
    let id = device_id.replace(':', ";");
    encode_structured(&format!("{id};{action}"))
}

/// Returns false for lines the transceiver never acknowledges (`REBOOT`).
#[must_use]
pub fn expects_reply(line: &str) -> bool {
    !line
        .split(';')
        .any(|element| element.trim().eq_ignore_ascii_case("REBOOT"))
}
