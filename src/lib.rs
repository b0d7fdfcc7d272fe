//! # quic-client-core: Loss Recovery and Ordered Delivery for a QUIC Client
//!
//! The two subsystems that carry an IETF QUIC client's consistency and
//! liveness guarantees (RFC 9000, RFC 9002):
//!
//! 1. **CRYPTO stream reassembly**: byte-ranged fragments that may
//!    arrive out of order, overlap or duplicate are reconstructed into
//!    the contiguous stream from offset zero and fed incrementally to a
//!    length-prefix handshake-message parser.
//! 2. **Loss recovery**: per-packet-number-space loss detection using
//!    time and packet thresholds, RTT estimation from ack samples, and
//!    Probe Timeout scheduling with exponential backoff behind a single
//!    shared timer.
//!
//! ```text
//! quic-client-core/
//! ├── error       - unified error types with wire error-code mapping
//! ├── types       - packet numbers, stream offsets, varint codec
//! ├── clock       - injectable time source
//! ├── frames      - ACK/CRYPTO consumption, probe frame vocabulary
//! ├── packet      - packet number spaces and sent-packet metadata
//! ├── handshake   - handshake progress as recovery observes it
//! ├── recovery    - RTT estimation, loss detection, PTO scheduling
//! └── stream      - reassembly buffer and CRYPTO stream
//! ```
//!
//! ## Design
//!
//! - **No I/O**: sending is delegated to a [`recovery::ProbeSender`],
//!   congestion policy to a [`recovery::CongestionAdvisor`]; both are
//!   referenced, never owned.
//! - **One timer**: all loss-detection and probe deadlines collapse
//!   into one scheduled expiration, re-derived after every event.
//! - **Deterministic**: all time flows through [`clock::Clock`], so
//!   loss and PTO arithmetic is reproducible under test.
//!
//! ## Data flow
//!
//! Inbound CRYPTO frames → [`stream::CryptoStream`] →
//! [`stream::OrderedByteBuffer`] → message parser. Inbound ACK frames →
//! [`recovery::RecoveryManager`] → per-space loss detector → RTT
//! estimator + congestion advisor → timer update. Timer expiration →
//! loss declaration in the earliest space, or a probe.

#![forbid(unsafe_code)]

pub mod clock;
pub mod error;
pub mod frames;
pub mod handshake;
pub mod packet;
pub mod recovery;
pub mod stream;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use frames::{AckFrame, AckRange, CryptoFrame, Frame, StreamFrame};
pub use handshake::{HandshakeState, HandshakeStateListener};
pub use packet::{EncryptionLevel, PnSpace, SentPacket};
pub use recovery::{
    CongestionAdvisor, LostPacketCallback, ProbeSender, RecoveryConfig, RecoveryManager,
    RttEstimator,
};
pub use stream::{CryptoStream, HandshakeMessageParser, MessageFraming, OrderedByteBuffer};
pub use types::{PacketNumber, StreamOffset, VarInt};
