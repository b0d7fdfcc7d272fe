//! Error types for the recovery and reassembly core.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors the recovery/reassembly core can surface to the connection.
///
/// Per RFC 9000 Section 20, fatal errors close the connection with a
/// transport error code; [`Error::to_wire`] provides that mapping.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Frame encoding error (0x07): malformed ACK or CRYPTO frame.
    #[error("frame encoding error")]
    FrameEncoding,

    /// Protocol violation (0x0A).
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// Crypto buffer exceeded (0x0D): reassembly past the configured limit.
    #[error("crypto buffer exceeded")]
    CryptoBufferExceeded,

    /// Handshake message parse failure (TLS alert range, 0x0100-0x01FF).
    ///
    /// Terminates handshake processing; there is no retry.
    #[error("handshake message parse error: {reason}")]
    HandshakeParse {
        /// TLS alert code reported on the wire.
        alert: u8,
        reason: &'static str,
    },
}

impl Error {
    /// Convert error to wire format error code (RFC 9000 Section 20.1).
    pub fn to_wire(&self) -> u64 {
        match self {
            Error::FrameEncoding => 0x07,
            Error::ProtocolViolation(_) => 0x0A,
            Error::CryptoBufferExceeded => 0x0D,
            Error::HandshakeParse { alert, .. } => 0x0100 + *alert as u64,
        }
    }

    /// Convert a wire format error code back to an error.
    ///
    /// Returns `None` for codes outside the set this core raises.
    pub fn from_wire(code: u64) -> Option<Self> {
        match code {
            0x07 => Some(Error::FrameEncoding),
            0x0A => Some(Error::ProtocolViolation("reported by peer")),
            0x0D => Some(Error::CryptoBufferExceeded),
            0x0100..=0x01FF => Some(Error::HandshakeParse {
                alert: (code - 0x0100) as u8,
                reason: "crypto error reported by peer",
            }),
            _ => None,
        }
    }
}
