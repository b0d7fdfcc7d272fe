//! Ordered-delivery machinery: the gap-aware reassembly buffer and
//! the CRYPTO stream that feeds the handshake-message parser.

pub mod buffer;
pub mod crypto_stream;

pub use buffer::OrderedByteBuffer;
pub use crypto_stream::{CryptoStream, HandshakeMessageParser, MessageFraming};
