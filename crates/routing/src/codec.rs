//! Incremental decoder for the daemon's message stream
//!
//! The daemons write one bare JSON object per message with no delimiter or
//! length prefix. Reads may split or coalesce messages, so bytes are buffered
//! and complete objects are peeled off the front as they become available.

use thiserror::Error;

use crate::protocol::RoutingServiceResponse;

/// Upper bound on buffered bytes of a single incomplete message
const MAX_BUFFERED_BYTES: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to parse routing service response ({error}): {raw}")]
    Malformed { error: String, raw: String },

    #[error("unexpected routing service message ({error}): {raw}")]
    Invalid { error: String, raw: String },

    #[error("routing service message exceeds {0} bytes")]
    TooLarge(usize),
}

#[derive(Debug, Default)]
pub struct MessageDecoder {
    buffer: Vec<u8>,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the connection
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Take the next complete message off the buffer.
    ///
    /// Returns `None` when more bytes are needed. A syntax error discards
    /// bytes up to the next `{`; a well-formed object that is not a valid
    /// response is dropped on its own.
    pub fn next_message(&mut self) -> Option<Result<RoutingServiceResponse, DecodeError>> {
        let mut stream =
            serde_json::Deserializer::from_slice(&self.buffer).into_iter::<serde_json::Value>();

        match stream.next() {
            None => {
                // Only whitespace left.
                self.buffer.clear();
                None
            }
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                let raw = String::from_utf8_lossy(&self.buffer[..consumed])
                    .trim()
                    .to_string();
                self.buffer.drain(..consumed);
                Some(
                    serde_json::from_value(value).map_err(|e| DecodeError::Invalid {
                        error: e.to_string(),
                        raw,
                    }),
                )
            }
            Some(Err(e)) if e.is_eof() => {
                if self.buffer.len() > MAX_BUFFERED_BYTES {
                    self.buffer.clear();
                    return Some(Err(DecodeError::TooLarge(MAX_BUFFERED_BYTES)));
                }
                None
            }
            Some(Err(e)) => {
                // Resynchronize on the next object start; later messages in
                // the same read survive.
                let skip = self.buffer[1..]
                    .iter()
                    .position(|&b| b == b'{')
                    .map_or(self.buffer.len(), |pos| pos + 1);
                let raw = String::from_utf8_lossy(&self.buffer[..skip])
                    .trim()
                    .to_string();
                self.buffer.drain(..skip);
                Some(Err(DecodeError::Malformed {
                    error: e.to_string(),
                    raw,
                }))
            }
        }
    }
}
