//! Incremental encoder/decoder over a rolling byte buffer.
//!
//! Messages arrive over a stream and may be split at any byte boundary.
//! The decoder buffers bytes until a whole message is present and only
//! then advances, so a truncated tail never corrupts its cursor.

use crate::error::WireError;
use crate::message::{Message, RpcDefinitions};
use crate::wire::Reader;
use bytes::{Buf, BytesMut};

/// Encodes messages to their framed byte form.
pub struct Encoder;

impl Encoder {
    /// Encodes a single message.
    pub fn encode(message: &Message) -> Result<BytesMut, WireError> {
        let mut buf = BytesMut::with_capacity(64);
        message.encode(&mut buf)?;
        Ok(buf)
    }
}

/// Attempts to parse one message from the front of `buf`.
///
/// Returns the message and the exact number of bytes it occupied, or
/// `Ok(None)` when the buffer holds only a prefix of a message. Any
/// `Err` is fatal to the connection that produced the bytes.
pub fn try_decode(
    buf: &[u8],
    definitions: &dyn RpcDefinitions,
) -> Result<Option<(Message, usize)>, WireError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut reader = Reader::new(buf);
    match Message::decode(&mut reader, definitions) {
        Ok(message) => Ok(Some((message, reader.position()))),
        Err(WireError::Truncated) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Streaming decoder holding bytes that do not yet form a whole message.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends freshly received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decodes the next whole message, if one is buffered.
    pub fn decode_message(
        &mut self,
        definitions: &dyn RpcDefinitions,
    ) -> Result<Option<Message>, WireError> {
        match try_decode(&self.buffer, definitions)? {
            Some((message, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discards any buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
