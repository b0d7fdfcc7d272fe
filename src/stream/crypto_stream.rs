//! CRYPTO stream reassembly and handshake-message framing
//! (RFC 9000 Section 7.5, RFC 9001 Section 4.1.3).

use crate::error::{Error, Result};
use crate::frames::CryptoFrame;
use crate::packet::EncryptionLevel;
use crate::stream::buffer::OrderedByteBuffer;
use bytes::Bytes;
use tracing::{debug, trace};

/// Default cap on reassembly storage for one crypto stream.
///
/// CRYPTO frames are exempt from flow control, so the buffer must be
/// bounded explicitly (RFC 9000 Section 7.5).
pub const DEFAULT_MAX_BUFFERED: usize = 64 * 1024;

/// Wire framing of the messages carried on the crypto stream.
///
/// A message is `header_len` bytes of header whose final `length_len`
/// bytes are a big-endian body length, followed by that many body
/// bytes. The parser receives header and body together.
#[derive(Debug, Clone, Copy)]
pub struct MessageFraming {
    pub header_len: usize,
    pub length_len: usize,
}

impl MessageFraming {
    /// TLS handshake messages: 1-byte type + 3-byte length
    /// (RFC 8446 Section 4).
    pub const TLS_HANDSHAKE: MessageFraming = MessageFraming {
        header_len: 4,
        length_len: 3,
    };

    /// A bare `n`-byte big-endian length prefix.
    pub fn length_prefixed(n: usize) -> MessageFraming {
        debug_assert!(n > 0 && n <= 8);
        MessageFraming {
            header_len: n,
            length_len: n,
        }
    }

    fn body_len(&self, header: &[u8]) -> usize {
        let mut len = 0usize;
        for &b in &header[self.header_len - self.length_len..self.header_len] {
            len = (len << 8) | b as usize;
        }
        len
    }
}

/// Parses one complete handshake message from its wire record.
///
/// The record includes the framing header. A parse failure is fatal to
/// the connection; the stream will not retry.
pub trait HandshakeMessageParser {
    type Message;

    fn parse(&mut self, record: Bytes) -> Result<Self::Message>;
}

/// Reassembles CRYPTO frames of one encryption level and feeds the
/// handshake-message parser as bytes become contiguous.
///
/// Frames may arrive out of order, overlap, or duplicate earlier
/// frames; the produced message sequence is exactly the left-to-right
/// parse of the underlying byte stream.
pub struct CryptoStream<P: HandshakeMessageParser> {
    level: EncryptionLevel,
    framing: MessageFraming,
    buffer: OrderedByteBuffer,
    parser: P,
    messages: Vec<P::Message>,
    max_buffered: usize,
}

impl<P: HandshakeMessageParser> CryptoStream<P> {
    pub fn new(level: EncryptionLevel, framing: MessageFraming, parser: P) -> Self {
        Self {
            level,
            framing,
            buffer: OrderedByteBuffer::new(),
            parser,
            messages: Vec::new(),
            max_buffered: DEFAULT_MAX_BUFFERED,
        }
    }

    pub fn with_max_buffered(mut self, max_buffered: usize) -> Self {
        self.max_buffered = max_buffered;
        self
    }

    /// Consume one CRYPTO frame and parse any messages that have
    /// become complete.
    pub fn add(&mut self, frame: CryptoFrame) -> Result<()> {
        let end = frame.offset + frame.len() as u64;
        if end > self.buffer.read_offset() + self.max_buffered as u64 {
            return Err(Error::CryptoBufferExceeded);
        }

        trace!(
            level = ?self.level,
            offset = frame.offset,
            len = frame.len(),
            "crypto frame received"
        );
        self.buffer.insert(frame.offset, frame.data);
        self.parse_available()
    }

    fn parse_available(&mut self) -> Result<()> {
        loop {
            let available = self.buffer.contiguous_available();
            if available < self.framing.header_len as u64 {
                return Ok(());
            }

            let mut header = [0u8; 8];
            self.buffer.peek(&mut header[..self.framing.header_len]);
            let record_len = self.framing.header_len + self.framing.body_len(&header);
            if available < record_len as u64 {
                return Ok(());
            }

            let record = self.buffer.read_contiguous(record_len);
            let message = self.parser.parse(record)?;
            debug!(level = ?self.level, "handshake message parsed");
            self.messages.push(message);
        }
    }

    /// Messages produced so far, in stream order.
    pub fn messages(&self) -> &[P::Message] {
        &self.messages
    }

    pub fn encryption_level(&self) -> EncryptionLevel {
        self.level
    }

    /// Bytes buffered awaiting reassembly or a complete record.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.buffered_bytes()
    }
}
