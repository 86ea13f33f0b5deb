//! Line framing for the RFLink serial protocol.
//!
//! The transceiver speaks plain text, one frame per line:
//! ```text
//! 20;2D;UPM/Esic;ID=0001;TEMP=00cf;HUM=16;BAT=OK;\r\n
//! ```
//! Inbound lines are split on a configurable delimiter, outbound lines are
//! always terminated with `\r\n`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Default line delimiter.
pub const DEFAULT_DELIMITER: &str = "\r\n";

/// Terminator appended to every outbound line.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Maximum accepted line length without a delimiter.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Text encoding of the serial stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextEncoding {
    /// UTF-8, invalid sequences are replaced.
    #[default]
    Utf8,
    /// ISO-8859-1, every byte maps to one char.
    Latin1,
}

impl TextEncoding {
    /// Decodes raw bytes into a string.
    #[must_use]
    pub fn decode(self, data: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(data).into_owned(),
            Self::Latin1 => data.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

/// Encodes a line for transmission.
#[must_use]
pub fn encode(line: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(line.len() + LINE_TERMINATOR.len());
    buf.put_slice(line.as_bytes());
    buf.put_slice(LINE_TERMINATOR);
    buf.freeze()
}

/// Line decoder that handles partial data.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: BytesMut,
    delimiter: Vec<u8>,
    encoding: TextEncoding,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER, TextEncoding::Utf8)
    }
}

impl LineDecoder {
    /// Creates a new line decoder.
    ///
    /// An empty delimiter falls back to [`DEFAULT_DELIMITER`].
    #[must_use]
    pub fn new(delimiter: &str, encoding: TextEncoding) -> Self {
        let delimiter = if delimiter.is_empty() {
            DEFAULT_DELIMITER
        } else {
            delimiter
        };
        Self {
            buffer: BytesMut::with_capacity(MAX_LINE_LENGTH),
            delimiter: delimiter.as_bytes().to_vec(),
            encoding,
        }
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete line (without delimiter).
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLong`] and discards the buffer if no delimiter
    /// shows up within [`MAX_LINE_LENGTH`] bytes.
    pub fn decode(&mut self) -> Result<Option<String>, FrameError> {
        if let Some(pos) = self
            .buffer
            .windows(self.delimiter.len())
            .position(|w| w == self.delimiter.as_slice())
        {
            let line = self.buffer.split_to(pos);
            self.buffer.advance(self.delimiter.len());
            return Ok(Some(self.encoding.decode(&line)));
        }

        if self.buffer.len() > MAX_LINE_LENGTH {
            let size = self.buffer.len();
            self.buffer.clear();
            return Err(FrameError::TooLong {
                size,
                max: MAX_LINE_LENGTH,
            });
        }

        Ok(None)
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
