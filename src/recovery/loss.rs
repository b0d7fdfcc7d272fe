//! Per-packet-number-space loss detection (RFC 9002 Section 6.1).

use crate::frames::AckFrame;
use crate::packet::SentPacket;
use crate::recovery::rtt::RttEstimator;
use crate::recovery::traits::CongestionAdvisor;
use crate::recovery::RecoveryConfig;
use crate::types::PacketNumber;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Invoked once when a tracked packet is declared lost, so the caller
/// can queue its data for retransmission.
pub type LostPacketCallback = Box<dyn FnOnce(&SentPacket) + Send>;

/// A packet declared lost, paired with the callback its sender
/// registered.
pub struct LostPacket {
    pub packet: SentPacket,
    pub on_lost: LostPacketCallback,
}

struct SentEntry {
    packet: SentPacket,
    time_sent: Instant,
    ack_eliciting: bool,
    in_flight: bool,
    on_lost: LostPacketCallback,
}

/// Tracks in-flight packets of one packet number space and declares
/// them acknowledged or lost.
///
/// A pure data+algorithm object: time and the RTT estimator are passed
/// in, nothing calls back out, and timer rearming is the caller's job.
pub struct LossDetector {
    config: RecoveryConfig,
    congestion: Arc<dyn CongestionAdvisor>,

    /// Unacknowledged sent packets, keyed by packet number.
    sent_packets: BTreeMap<PacketNumber, SentEntry>,

    largest_acked: Option<PacketNumber>,

    /// Earliest instant at which an unacked packet crosses the time
    /// threshold; drives the loss-detection arm of the shared timer.
    loss_time: Option<Instant>,

    last_ack_eliciting_sent: Option<Instant>,

    /// True until any ack arrives in this space.
    no_ack_received: bool,

    lost_count: u64,
}

impl LossDetector {
    pub fn new(config: RecoveryConfig, congestion: Arc<dyn CongestionAdvisor>) -> Self {
        Self {
            config,
            congestion,
            sent_packets: BTreeMap::new(),
            largest_acked: None,
            loss_time: None,
            last_ack_eliciting_sent: None,
            no_ack_received: true,
            lost_count: 0,
        }
    }

    /// Register a sent packet for loss tracking.
    pub fn on_packet_sent(
        &mut self,
        packet: SentPacket,
        time_sent: Instant,
        on_lost: LostPacketCallback,
    ) {
        let ack_eliciting = packet.is_ack_eliciting();
        let in_flight = packet.is_in_flight();

        if ack_eliciting {
            self.last_ack_eliciting_sent = Some(time_sent);
        }
        if in_flight {
            self.congestion.on_packet_sent(packet.size);
        }

        self.sent_packets.insert(
            packet.packet_number,
            SentEntry {
                packet,
                time_sent,
                ack_eliciting,
                in_flight,
                on_lost,
            },
        );
    }

    /// Process an ACK frame: remove newly-acked packets, feed the RTT
    /// estimator, and run loss detection.
    ///
    /// Returns the packets this ack caused to be declared lost; their
    /// callbacks have not been invoked.
    pub fn on_ack_received(
        &mut self,
        ack: &AckFrame,
        ack_delay_ms: u64,
        now: Instant,
        rtt: &mut RttEstimator,
    ) -> Vec<LostPacket> {
        self.largest_acked = Some(
            self.largest_acked
                .map_or(ack.largest_acknowledged, |cur| {
                    cur.max(ack.largest_acknowledged)
                }),
        );

        let newly_acked: Vec<PacketNumber> = ack
            .ack_ranges
            .iter()
            .filter(|range| range.smallest <= range.largest)
            .flat_map(|range| {
                self.sent_packets
                    .range(range.smallest..=range.largest)
                    .map(|(&pn, _)| pn)
            })
            .collect();

        for pn in newly_acked {
            if let Some(entry) = self.sent_packets.remove(&pn) {
                if entry.in_flight {
                    self.congestion.on_packet_acked(entry.packet.size);
                }
                // The largest newly-acked, ack-eliciting packet that is
                // also the frame's largest supplies the RTT sample
                if pn == ack.largest_acknowledged && entry.ack_eliciting {
                    rtt.add_sample(now, entry.time_sent, ack_delay_ms);
                }
            }
        }

        let lost = self.detect_lost_packets(now, rtt);
        self.no_ack_received = false;
        lost
    }

    /// Declare packets lost by time or packet threshold
    /// (RFC 9002 Section 6.1) and recompute `loss_time`.
    pub fn detect_lost_packets(&mut self, now: Instant, rtt: &RttEstimator) -> Vec<LostPacket> {
        self.loss_time = None;
        let Some(largest_acked) = self.largest_acked else {
            return Vec::new();
        };

        let max_rtt = rtt.smoothed_rtt().max(rtt.latest_rtt()) as u64;
        let loss_delay_ms =
            ((max_rtt as f64 * self.config.time_threshold) as u64).max(self.config.granularity_ms);
        let loss_delay = Duration::from_millis(loss_delay_ms);

        let mut to_declare: Vec<PacketNumber> = Vec::new();
        for (&pn, entry) in self.sent_packets.range(..largest_acked) {
            let by_time = now.saturating_duration_since(entry.time_sent) >= loss_delay;
            let by_count = largest_acked - pn >= self.config.packet_threshold;
            if by_time || by_count {
                to_declare.push(pn);
            } else {
                let candidate = entry.time_sent + loss_delay;
                if self.loss_time.map_or(true, |t| candidate < t) {
                    self.loss_time = Some(candidate);
                }
            }
        }

        let mut lost = Vec::with_capacity(to_declare.len());
        let mut lost_sizes = Vec::new();
        for pn in to_declare {
            if let Some(entry) = self.sent_packets.remove(&pn) {
                debug!(pn, "packet declared lost");
                self.lost_count += 1;
                if entry.in_flight {
                    lost_sizes.push(entry.packet.size);
                }
                lost.push(LostPacket {
                    packet: entry.packet,
                    on_lost: entry.on_lost,
                });
            }
        }
        if !lost_sizes.is_empty() {
            self.congestion.on_packets_lost(&lost_sizes);
        }
        lost
    }

    /// Drop all tracking for this space (key discard).
    ///
    /// Pending lost callbacks are dropped without being invoked; the
    /// space's packets are abandoned, not lost.
    pub fn reset(&mut self) {
        self.sent_packets.clear();
        self.loss_time = None;
        self.last_ack_eliciting_sent = None;
    }

    pub fn loss_time(&self) -> Option<Instant> {
        self.loss_time
    }

    pub fn last_ack_eliciting_sent(&self) -> Option<Instant> {
        self.last_ack_eliciting_sent
    }

    pub fn no_ack_received(&self) -> bool {
        self.no_ack_received
    }

    /// Whether any ack-eliciting packet is still in flight.
    pub fn ack_eliciting_in_flight(&self) -> bool {
        self.sent_packets
            .values()
            .any(|e| e.ack_eliciting && e.in_flight)
    }

    /// Unacknowledged packets in packet-number order.
    pub fn unacked(&self) -> impl Iterator<Item = &SentPacket> {
        self.sent_packets.values().map(|e| &e.packet)
    }

    /// Packets this detector has declared lost since creation.
    pub fn lost_count(&self) -> u64 {
        self.lost_count
    }
}
