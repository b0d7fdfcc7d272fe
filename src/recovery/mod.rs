//! Loss detection and probe scheduling (RFC 9002).
//!
//! The recovery subsystem separates into:
//!
//! 1. **RTT estimation** ([`RttEstimator`]): smoothed RTT and variance
//!    from acknowledgement samples, feeding timer arithmetic.
//! 2. **Loss detection** ([`LossDetector`], one per packet number
//!    space): in-flight tracking, ack processing, time/packet
//!    threshold loss declaration.
//! 3. **Orchestration** ([`RecoveryManager`]): owns the detectors,
//!    the estimator and the single loss-detection timer; computes the
//!    PTO and emits probes through a [`ProbeSender`].
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            RecoveryManager               │
//! │  one lock, one timer, three detectors    │
//! └───┬───────────────┬───────────────┬──────┘
//!     ▼               ▼               ▼
//! LossDetector   LossDetector   LossDetector
//!  (Initial)      (Handshake)       (App)
//!     │               │               │
//!     └──────► RttEstimator ◄─────────┘
//!                    │
//!            CongestionAdvisor (external)
//! ```
//!
//! The detectors are pure data+algorithm objects: they never call back
//! into the manager. Every event handler re-derives the single timer
//! deadline after delegating.

pub mod loss;
pub mod manager;
pub mod rtt;
pub mod timer;
pub mod traits;

pub use loss::{LossDetector, LostPacket, LostPacketCallback};
pub use manager::RecoveryManager;
pub use rtt::RttEstimator;
pub use traits::{CongestionAdvisor, ProbeSender};

/// Recovery tuning knobs (RFC 9002 Appendix A), injected rather than
/// global.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryConfig {
    /// Packet reordering threshold: a packet is lost once this many
    /// later packets are acknowledged (RFC 9002 Section 6.1.1).
    pub packet_threshold: u64,

    /// Time reordering threshold, as a multiplier over
    /// `max(smoothed_rtt, latest_rtt)` (RFC 9002 Section 6.1.2).
    pub time_threshold: f64,

    /// Timer granularity in milliseconds; loss delays and the PTO
    /// variance term never drop below this (RFC 9002 Section 6.1.2).
    pub granularity_ms: u64,

    /// Initial RTT before any sample, in milliseconds.
    ///
    /// Draft recovery guidance for new connections; together with the
    /// estimator's unset-variance default this makes the first PTO
    /// twice the initial RTT.
    pub initial_rtt_ms: u32,

    /// Peer `ack_delay_exponent` transport parameter
    /// (RFC 9000 Section 18.2).
    pub ack_delay_exponent: u8,

    /// Peer `max_ack_delay` until the transport parameters arrive,
    /// in milliseconds.
    pub max_ack_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            packet_threshold: 3,
            time_threshold: 9.0 / 8.0,
            granularity_ms: 1,
            initial_rtt_ms: 500,
            ack_delay_exponent: 3,
            max_ack_delay_ms: 25,
        }
    }
}
