//! RTT estimation (RFC 9002 Section 5).
//!
//! All intervals are whole milliseconds; sub-millisecond precision is
//! below the recovery timer granularity.

use std::time::Instant;
use tracing::{debug, error};

/// Smoothed RTT, RTT variance, minimum and latest RTT from
/// acknowledgement samples.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    initial_rtt_ms: u32,

    /// Minimum RTT observed; MAX until the first sample.
    min_rtt_ms: u32,

    /// Exponentially weighted moving average; 0 means no sample has
    /// been accepted yet.
    smoothed_rtt_ms: u32,

    rtt_var_ms: u32,

    latest_rtt_ms: u32,
}

impl RttEstimator {
    /// `initial_rtt_ms` is used until the first sample arrives; 500 ms
    /// is the draft guidance when no previous RTT is available.
    pub fn new(initial_rtt_ms: u32) -> Self {
        Self {
            initial_rtt_ms,
            min_rtt_ms: u32::MAX,
            smoothed_rtt_ms: 0,
            rtt_var_ms: 0,
            latest_rtt_ms: 0,
        }
    }

    /// Feed one acknowledgement sample (RFC 9002 Section 5.3).
    ///
    /// `ack_delay_ms` is the peer-reported delay, already clamped to
    /// the peer's `max_ack_delay` by the caller. Samples with
    /// `time_received` before `time_sent` are discarded.
    pub fn add_sample(&mut self, time_received: Instant, time_sent: Instant, ack_delay_ms: u64) {
        if time_received < time_sent {
            error!(?time_sent, ?time_received, "negative rtt sample discarded");
            return;
        }

        let previous_smoothed = self.smoothed_rtt_ms;
        let mut sample = (time_received - time_sent).as_millis() as u32;
        self.latest_rtt_ms = sample;
        if sample < self.min_rtt_ms {
            self.min_rtt_ms = sample;
        }
        // Adjust for ack delay if it's plausible: the delay may not
        // push the adjusted sample below the minimum RTT.
        if u64::from(sample) > u64::from(self.min_rtt_ms) + ack_delay_ms {
            sample -= ack_delay_ms as u32;
        }

        if self.smoothed_rtt_ms == 0 {
            // First sample bootstraps the average and the variance
            self.smoothed_rtt_ms = sample;
            self.rtt_var_ms = sample / 2;
        } else {
            // Single-division EWMA: constant samples are an exact
            // fixed point, which the truncate-each-term form loses.
            let var_sample = self.smoothed_rtt_ms.abs_diff(sample);
            self.rtt_var_ms = (3 * self.rtt_var_ms + var_sample) / 4;
            self.smoothed_rtt_ms = (7 * self.smoothed_rtt_ms + sample) / 8;
        }

        debug!(
            previous = previous_smoothed,
            sample,
            smoothed = self.smoothed_rtt_ms,
            "rtt updated"
        );
    }

    /// Smoothed RTT in milliseconds; the initial RTT until a sample
    /// has been accepted.
    pub fn smoothed_rtt(&self) -> u32 {
        if self.smoothed_rtt_ms == 0 {
            self.initial_rtt_ms
        } else {
            self.smoothed_rtt_ms
        }
    }

    /// RTT variance in milliseconds.
    ///
    /// While no sample has been accepted this returns `initial_rtt/4`,
    /// which makes the initial PTO
    /// (`smoothed + max(4·rttvar, granularity)`) equal twice the
    /// initial RTT.
    pub fn rtt_var(&self) -> u32 {
        if self.smoothed_rtt_ms == 0 {
            self.initial_rtt_ms / 4
        } else {
            self.rtt_var_ms
        }
    }

    /// Latest accepted sample, before ack-delay adjustment.
    pub fn latest_rtt(&self) -> u32 {
        self.latest_rtt_ms
    }

    /// Minimum RTT observed, or MAX before the first sample.
    pub fn min_rtt(&self) -> u32 {
        self.min_rtt_ms
    }
}
