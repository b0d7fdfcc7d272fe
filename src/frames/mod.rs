//! QUIC frame types consumed and emitted by the recovery core
//! (RFC 9000 Section 19).
//!
//! Only the frames this crate touches are modelled: ACK and CRYPTO on
//! the receive path, PING/PADDING and retransmitted frames on the
//! probe path.

pub mod parse;

pub use parse::{decode_ack_frame, decode_crypto_frame};

use crate::types::{PacketNumber, StreamOffset, VarInt};
use bytes::Bytes;
use tinyvec::TinyVec;

/// Frame type constants (RFC 9000 Section 19).
pub const FRAME_TYPE_PADDING: u8 = 0x00;
pub const FRAME_TYPE_PING: u8 = 0x01;
pub const FRAME_TYPE_ACK: u8 = 0x02;
pub const FRAME_TYPE_ACK_ECN: u8 = 0x03;
pub const FRAME_TYPE_CRYPTO: u8 = 0x06;
pub const FRAME_TYPE_HANDSHAKE_DONE: u8 = 0x1e;

/// Default `ack_delay_exponent` when the peer's transport parameters
/// omit it (RFC 9000 Section 18.2).
pub const DEFAULT_ACK_DELAY_EXPONENT: u8 = 3;

/// An inclusive range of acknowledged packet numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckRange {
    pub smallest: PacketNumber,
    pub largest: PacketNumber,
}

/// ACK frame, reduced to the fields recovery consumes
/// (RFC 9000 Section 19.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    /// Largest packet number being acknowledged.
    pub largest_acknowledged: PacketNumber,

    /// Encoded ACK delay; multiply by `2^ack_delay_exponent` for
    /// microseconds.
    pub ack_delay: VarInt,

    /// Inclusive acknowledged ranges, largest range first.
    pub ack_ranges: TinyVec<[AckRange; 8]>,
}

impl AckFrame {
    /// An ACK covering the single packet `largest`.
    pub fn new(largest: PacketNumber, ack_delay: VarInt) -> Self {
        let mut ack_ranges = TinyVec::new();
        ack_ranges.push(AckRange {
            smallest: largest,
            largest,
        });
        Self {
            largest_acknowledged: largest,
            ack_delay,
            ack_ranges,
        }
    }

    /// An ACK covering the inclusive range `smallest..=largest`.
    pub fn range(smallest: PacketNumber, largest: PacketNumber, ack_delay: VarInt) -> Self {
        let mut ack_ranges = TinyVec::new();
        ack_ranges.push(AckRange { smallest, largest });
        Self {
            largest_acknowledged: largest,
            ack_delay,
            ack_ranges,
        }
    }

    /// Decoded ACK delay in milliseconds: `ack_delay << exponent`
    /// microseconds, truncated to whole milliseconds
    /// (RFC 9000 Section 19.3).
    pub fn ack_delay_ms(&self, ack_delay_exponent: u8) -> u64 {
        (self.ack_delay << ack_delay_exponent) / 1000
    }

    /// Whether `pn` is acknowledged by this frame.
    pub fn acknowledges(&self, pn: PacketNumber) -> bool {
        self.ack_ranges
            .iter()
            .any(|r| pn >= r.smallest && pn <= r.largest)
    }
}

/// CRYPTO frame (RFC 9000 Section 19.6). No stream id, no FIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoFrame {
    /// Byte offset of `data` in the crypto stream of its level.
    pub offset: StreamOffset,
    pub data: Bytes,
}

impl CryptoFrame {
    pub fn new(offset: StreamOffset, data: impl Into<Bytes>) -> Self {
        Self {
            offset,
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// STREAM frame, reduced to what probe retransmission carries
/// (RFC 9000 Section 19.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub stream_id: VarInt,
    pub offset: StreamOffset,
    pub data: Bytes,
    pub fin: bool,
}

/// The frames the recovery core handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// PADDING, collapsed to a byte count.
    Padding(u16),
    Ping,
    Ack(AckFrame),
    Crypto(CryptoFrame),
    Stream(StreamFrame),
    HandshakeDone,
}

impl Frame {
    /// A frame is ack-eliciting iff it is anything other than ACK or
    /// PADDING (RFC 9002 Section 2).
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(self, Frame::Ack(_) | Frame::Padding(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_classification() {
        assert!(!Frame::Padding(5).is_ack_eliciting());
        assert!(!Frame::Ack(AckFrame::new(0, 0)).is_ack_eliciting());
        assert!(Frame::Ping.is_ack_eliciting());
        assert!(Frame::Crypto(CryptoFrame::new(0, Bytes::from_static(b"x"))).is_ack_eliciting());
        assert!(Frame::HandshakeDone.is_ack_eliciting());
    }

    #[test]
    fn test_ack_delay_decoding() {
        // RFC 9000 §19.3: delay = value << exponent, in microseconds.
        // 1000 << 3 = 8000us = 8ms
        let ack = AckFrame::new(7, 1000);
        assert_eq!(ack.ack_delay_ms(DEFAULT_ACK_DELAY_EXPONENT), 8);

        // Sub-millisecond delays truncate to zero
        let ack = AckFrame::new(7, 100);
        assert_eq!(ack.ack_delay_ms(0), 0);
    }

    #[test]
    fn test_ack_acknowledges() {
        let mut ack = AckFrame::range(5, 9, 0);
        ack.ack_ranges.push(AckRange {
            smallest: 1,
            largest: 2,
        });

        assert!(ack.acknowledges(5));
        assert!(ack.acknowledges(9));
        assert!(ack.acknowledges(1));
        assert!(!ack.acknowledges(0));
        assert!(!ack.acknowledges(3));
        assert!(!ack.acknowledges(10));
    }
}
