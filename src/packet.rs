//! Packet number spaces, encryption levels and sent-packet metadata
//! (RFC 9000 Section 12.3, RFC 9002 Section 2).

use crate::frames::Frame;
use crate::types::PacketNumber;

/// Packet number space (RFC 9000 Section 12.3).
///
/// Each space has an independent packet-number axis and its own loss
/// detection state. The Initial space is discarded once the client
/// sends its first Handshake packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PnSpace {
    Initial,
    Handshake,
    App,
}

impl PnSpace {
    /// All spaces, in the order loss detection iterates them.
    pub const ALL: [PnSpace; 3] = [PnSpace::Initial, PnSpace::Handshake, PnSpace::App];

    /// The encryption level probes for this space are sent at.
    ///
    /// On the send side `PnSpace::App` covers both 0-RTT and 1-RTT,
    /// but recovery bookkeeping always probes at the 1-RTT level.
    pub fn related_encryption_level(self) -> EncryptionLevel {
        match self {
            PnSpace::Initial => EncryptionLevel::Initial,
            PnSpace::Handshake => EncryptionLevel::Handshake,
            PnSpace::App => EncryptionLevel::App,
        }
    }
}

/// Encryption level of a packet (RFC 9001 Section 2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionLevel {
    Initial,
    ZeroRtt,
    Handshake,
    App,
}

impl EncryptionLevel {
    /// The packet number space packets at this level are tracked in.
    ///
    /// 0-RTT and 1-RTT packets share the application-data space
    /// (RFC 9000 Section 12.3).
    pub fn pn_space(self) -> PnSpace {
        match self {
            EncryptionLevel::Initial => PnSpace::Initial,
            EncryptionLevel::Handshake => PnSpace::Handshake,
            EncryptionLevel::ZeroRtt | EncryptionLevel::App => PnSpace::App,
        }
    }
}

/// Metadata for a sent packet, tracked until it is acknowledged,
/// declared lost, or its space is discarded (RFC 9002 Section 2).
#[derive(Debug, Clone)]
pub struct SentPacket {
    /// Packet number within its space.
    pub packet_number: PacketNumber,

    /// Encryption level the packet was sent at.
    pub level: EncryptionLevel,

    /// Size of the packet in bytes (UDP payload share).
    pub size: u32,

    /// Frames carried by the packet, kept for probe retransmission.
    pub frames: Vec<Frame>,
}

impl SentPacket {
    pub fn new(
        packet_number: PacketNumber,
        level: EncryptionLevel,
        size: u32,
        frames: Vec<Frame>,
    ) -> Self {
        Self {
            packet_number,
            level,
            size,
            frames,
        }
    }

    /// The packet number space this packet is tracked in.
    pub fn pn_space(&self) -> PnSpace {
        self.level.pn_space()
    }

    /// A packet is ack-eliciting iff it contains any frame other than
    /// ACK or PADDING (RFC 9002 Section 2).
    pub fn is_ack_eliciting(&self) -> bool {
        self.frames.iter().any(|f| f.is_ack_eliciting())
    }

    /// A packet counts toward bytes in flight iff it is ack-eliciting
    /// or contains PADDING (RFC 9002 Section 2).
    pub fn is_in_flight(&self) -> bool {
        self.frames
            .iter()
            .any(|f| f.is_ack_eliciting() || matches!(f, Frame::Padding(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{AckFrame, CryptoFrame};
    use bytes::Bytes;

    fn ack_frame() -> Frame {
        Frame::Ack(AckFrame::new(3, 0))
    }

    fn crypto_frame() -> Frame {
        Frame::Crypto(CryptoFrame::new(0, Bytes::from_static(b"hello")))
    }

    #[test]
    fn test_encryption_level_to_pn_space() {
        assert_eq!(EncryptionLevel::Initial.pn_space(), PnSpace::Initial);
        assert_eq!(EncryptionLevel::Handshake.pn_space(), PnSpace::Handshake);
        // RFC 9000 §12.3: 0-RTT and 1-RTT share the application space
        assert_eq!(EncryptionLevel::ZeroRtt.pn_space(), PnSpace::App);
        assert_eq!(EncryptionLevel::App.pn_space(), PnSpace::App);
    }

    #[test]
    fn test_related_encryption_level_is_total() {
        assert_eq!(
            PnSpace::Initial.related_encryption_level(),
            EncryptionLevel::Initial
        );
        assert_eq!(
            PnSpace::Handshake.related_encryption_level(),
            EncryptionLevel::Handshake
        );
        assert_eq!(PnSpace::App.related_encryption_level(), EncryptionLevel::App);
    }

    #[test]
    fn test_ack_eliciting_classification() {
        // ACK + PADDING only: not ack-eliciting, but PADDING makes it in-flight
        let p = SentPacket::new(
            0,
            EncryptionLevel::Initial,
            1200,
            vec![ack_frame(), Frame::Padding(100)],
        );
        assert!(!p.is_ack_eliciting());
        assert!(p.is_in_flight());

        // A pure ACK packet is neither
        let p = SentPacket::new(1, EncryptionLevel::App, 30, vec![ack_frame()]);
        assert!(!p.is_ack_eliciting());
        assert!(!p.is_in_flight());

        // CRYPTO elicits an ACK and is in flight
        let p = SentPacket::new(2, EncryptionLevel::Initial, 1200, vec![crypto_frame()]);
        assert!(p.is_ack_eliciting());
        assert!(p.is_in_flight());

        // PING elicits an ACK
        let p = SentPacket::new(3, EncryptionLevel::App, 25, vec![Frame::Ping]);
        assert!(p.is_ack_eliciting());
        assert!(p.is_in_flight());
    }
}
