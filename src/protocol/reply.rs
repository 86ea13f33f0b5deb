//! Classification of `20;` lines received while the link is active.
//!
//! Replies carry no request id. They are correlated with the single command in
//! flight purely by ordering.

use crate::protocol::parser::Line;
use crate::types::Fields;

/// What a `20;` line means to the link engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `OK`: the command in flight succeeded.
    Ok,
    /// `CMD UNKNOWN`: the command in flight was rejected.
    CommandUnknown,
    /// A known acknowledgement carrying data (`VER=`, `RFDEBUG=`, ...).
    Ack { token: String, fields: Fields },
    /// Keepalive answer, never a command reply.
    Pong,
    /// Device data or debug output, forwarded upward.
    Telemetry,
}

impl Reply {
    /// Returns true if this line completes the command in flight.
    #[must_use]
    pub const fn completes_command(&self) -> bool {
        matches!(self, Self::Ok | Self::CommandUnknown | Self::Ack { .. })
    }
}

/// Returns true for `RECORD nn CLEANED` confirmations.
fn is_record_cleaned(token: &str) -> bool {
    token
        .strip_prefix("RECORD ")
        .and_then(|rest| rest.strip_suffix(" CLEANED"))
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Classifies a `20;` line by the first token of its first field.
#[must_use]
pub fn classify(line: &Line) -> Reply {
    let token = line.first_token();
    match token {
        "OK" => Reply::Ok,
        "CMD UNKNOWN" => Reply::CommandUnknown,
        "PONG" => Reply::Pong,
        "VER" | "RFDEBUG" | "RFUDEBUG" | "QRFDEBUG" | "RTSINVERT" | "RTSLONGTX"
        | "TRISTATEINVERT" | "RTS CLEANED" => Reply::Ack {
            token: token.to_owned(),
            fields: line.fields(),
        },
        t if is_record_cleaned(t) => Reply::Ack {
            token: token.to_owned(),
            fields: line.fields(),
        },
        _ => Reply::Telemetry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_line;

    fn classify_str(raw: &str) -> Reply {
        classify(&parse_line(raw).unwrap())
    }

    #[test]
    fn test_classify_simple_replies() {
        assert_eq!(classify_str("20;01;OK;"), Reply::Ok);
        assert_eq!(classify_str("20;02;CMD UNKNOWN;"), Reply::CommandUnknown);
        assert_eq!(classify_str("20;03;PONG;"), Reply::Pong);
    }

    #[test]
    fn test_classify_acks_carry_payload() {
        let Reply::Ack { token, fields } = classify_str("20;04;RFDEBUG=ON;") else {
            panic!("expected ack");
        };
        assert_eq!(token, "RFDEBUG");
        assert_eq!(fields.get("rfdebug"), Some("ON"));

        let Reply::Ack { fields, .. } = classify_str("20;05;RECORD 07 CLEANED;") else {
            panic!("expected ack");
        };
        assert_eq!(fields.get("unknown1"), Some("RECORD 07 CLEANED"));

        assert!(classify_str("20;06;VER=1.1;REV=46;BUILD=0c;").completes_command());
    }

    #[test]
    fn test_classify_telemetry() {
        assert_eq!(
            classify_str("20;2D;UPM/Esic;ID=0001;TEMP=00cf;"),
            Reply::Telemetry
        );
        assert_eq!(classify_str("20;07;DEBUG;Pulses=90;"), Reply::Telemetry);
        assert_eq!(classify_str("20;08;RECORD XX CLEANED;"), Reply::Telemetry);
        assert!(!Reply::Pong.completes_command());
    }
}
