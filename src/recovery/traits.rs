//! Contracts for the recovery manager's external collaborators.
//!
//! Both are referenced (`Arc<dyn …>`), never owned; how probe bytes
//! reach the wire and how the congestion window reacts are opaque to
//! this crate.

use crate::frames::Frame;
use crate::packet::EncryptionLevel;

/// Congestion-control advisor notified of recovery events
/// (RFC 9002 Section 7, consumed as an opaque policy).
pub trait CongestionAdvisor: Send + Sync {
    /// An in-flight packet of `size` bytes was sent.
    fn on_packet_sent(&self, size: u32);

    /// An in-flight packet of `size` bytes was acknowledged.
    fn on_packet_acked(&self, size: u32);

    /// In-flight packets were declared lost.
    fn on_packets_lost(&self, sizes: &[u32]);

    /// Whether the sender may currently put more data in flight.
    fn can_send(&self) -> bool;
}

/// Sends probe packets on PTO expiration.
///
/// Best-effort and fire-and-forget: probes may themselves be lost, and
/// the resulting `packet_sent` event is what re-arms the timer.
pub trait ProbeSender: Send + Sync {
    fn send_probe(&self, frames: Vec<Frame>, level: EncryptionLevel);
}
