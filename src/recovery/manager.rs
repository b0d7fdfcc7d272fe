//! Recovery orchestration: one lock, one timer, three detectors
//! (RFC 9002 Sections 6.2-6.3).

use crate::clock::Clock;
use crate::frames::{AckFrame, Frame};
use crate::handshake::{HandshakeState, HandshakeStateListener};
use crate::packet::{EncryptionLevel, PnSpace, SentPacket};
use crate::recovery::loss::{LossDetector, LostPacket, LostPacketCallback};
use crate::recovery::rtt::RttEstimator;
use crate::recovery::timer::LossDetectionTimer;
use crate::recovery::traits::{CongestionAdvisor, ProbeSender};
use crate::recovery::RecoveryConfig;
use parking_lot::Mutex;
use std::io;
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

fn idx(space: PnSpace) -> usize {
    match space {
        PnSpace::Initial => 0,
        PnSpace::Handshake => 1,
        PnSpace::App => 2,
    }
}

struct RecoveryState {
    rtt: RttEstimator,
    detectors: [LossDetector; 3],
    pto_count: u32,

    /// Expiration of the armed timer; None when unarmed. The fired
    /// callback re-checks this, so a cancel that loses the race with a
    /// fire stays harmless.
    timer_expiration: Option<Instant>,

    /// Generation token of the most recent arm; stale fires no-op.
    timer_generation: u64,

    handshake_state: HandshakeState,
    first_handshake_sent: bool,
    receiver_max_ack_delay_ms: u64,
    stopped: bool,
}

struct ProbePlan {
    frames: Vec<Frame>,
    level: EncryptionLevel,
    count: u32,
}

struct RecoveryShared {
    config: RecoveryConfig,
    clock: Arc<dyn Clock>,
    sender: Arc<dyn ProbeSender>,
    timer: LossDetectionTimer,
    state: Mutex<RecoveryState>,
}

/// Orchestrates loss detection across the three packet number spaces.
///
/// Owns the RTT estimator, the per-space [`LossDetector`]s and the
/// single loss-detection timer. Every event re-derives the one timer
/// deadline: the earliest per-space loss time if any exists, otherwise
/// the probe timeout, otherwise unarmed.
///
/// All operations serialize on one internal lock; lost-packet
/// callbacks and probe emission run after the lock is released, so a
/// [`ProbeSender`] may synchronously feed the resulting packet back
/// through [`packet_sent`](Self::packet_sent).
#[derive(Clone)]
pub struct RecoveryManager {
    shared: Arc<RecoveryShared>,
}

impl RecoveryManager {
    /// Create the manager and spawn its timer thread.
    ///
    /// `congestion` and `sender` are the external collaborators;
    /// they are shared, never owned.
    pub fn new(
        config: RecoveryConfig,
        congestion: Arc<dyn CongestionAdvisor>,
        sender: Arc<dyn ProbeSender>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let slot: Arc<OnceLock<Weak<RecoveryShared>>> = Arc::new(OnceLock::new());
        let fire_slot = slot.clone();
        let timer = LossDetectionTimer::spawn(move |generation| {
            if let Some(shared) = fire_slot.get().and_then(Weak::upgrade) {
                shared.on_loss_detection_timeout(generation);
            }
        })?;

        let detectors = [
            LossDetector::new(config, congestion.clone()),
            LossDetector::new(config, congestion.clone()),
            LossDetector::new(config, congestion),
        ];
        let shared = Arc::new(RecoveryShared {
            config,
            clock,
            sender,
            timer,
            state: Mutex::new(RecoveryState {
                rtt: RttEstimator::new(config.initial_rtt_ms),
                detectors,
                pto_count: 0,
                timer_expiration: None,
                timer_generation: 0,
                handshake_state: HandshakeState::Initial,
                first_handshake_sent: false,
                receiver_max_ack_delay_ms: config.max_ack_delay_ms,
                stopped: false,
            }),
        });
        let _ = slot.set(Arc::downgrade(&shared));

        Ok(Self { shared })
    }

    /// Register a sent packet. `on_lost` is invoked at most once, when
    /// the packet is declared lost.
    ///
    /// Sending the first Handshake packet discards the Initial keys,
    /// so the Initial detector is reset here.
    pub fn packet_sent(&self, packet: SentPacket, time_sent: Instant, on_lost: LostPacketCallback) {
        let mut state = self.shared.state.lock();
        if state.stopped {
            return;
        }

        if packet.level == EncryptionLevel::Handshake && !state.first_handshake_sent {
            debug!("resetting Initial space; first Handshake packet sent");
            state.detectors[idx(PnSpace::Initial)].reset();
            state.first_handshake_sent = true;
        }

        if packet.is_in_flight() {
            let space = packet.pn_space();
            state.detectors[idx(space)].on_packet_sent(packet, time_sent, on_lost);
            self.shared.set_loss_detection_timer(&mut state);
        }
    }

    /// Process an ACK frame received in `pn_space`.
    ///
    /// RTT sampling, newly-acked bookkeeping, loss detection and the
    /// timer re-arm all complete before lost-packet callbacks run.
    pub fn on_ack_received(&self, ack: &AckFrame, pn_space: PnSpace) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.stopped {
            return;
        }

        state.pto_count = 0;
        let now = shared.clock.now();
        let ack_delay_ms = ack
            .ack_delay_ms(shared.config.ack_delay_exponent)
            .min(state.receiver_max_ack_delay_ms);

        let st = &mut *state;
        let lost = st.detectors[idx(pn_space)].on_ack_received(ack, ack_delay_ms, now, &mut st.rtt);
        shared.set_loss_detection_timer(&mut state);
        drop(state);

        dispatch_lost(lost);
    }

    /// Update the peer's `max_ack_delay` from its transport parameters.
    pub fn set_receiver_max_ack_delay(&self, max_ack_delay_ms: u64) {
        self.shared.state.lock().receiver_max_ack_delay_ms = max_ack_delay_ms;
    }

    /// Stop recovery entirely: cancel the timer, reset every detector
    /// and ignore all subsequent events.
    pub fn stop_recovery(&self) {
        let mut state = self.shared.state.lock();
        state.stopped = true;
        self.shared.unschedule(&mut state);
        for space in PnSpace::ALL {
            debug!(?space, "resetting loss detector");
            state.detectors[idx(space)].reset();
        }
    }

    /// Abandon loss recovery for one packet number space (key discard).
    pub fn stop_recovery_space(&self, space: PnSpace) {
        let mut state = self.shared.state.lock();
        if state.stopped {
            return;
        }
        debug!(?space, "resetting loss detector");
        state.detectors[idx(space)].reset();
    }

    /// Packets declared lost across all spaces since creation.
    pub fn lost_count(&self) -> u64 {
        let state = self.shared.state.lock();
        state.detectors.iter().map(LossDetector::lost_count).sum()
    }

    /// Consecutive PTO expirations without an intervening ack.
    pub fn pto_count(&self) -> u32 {
        self.shared.state.lock().pto_count
    }

    /// Expiration of the armed loss-detection timer, if any.
    pub fn timer_expiration(&self) -> Option<Instant> {
        self.shared.state.lock().timer_expiration
    }

    /// Snapshot of the RTT estimator.
    pub fn rtt(&self) -> RttEstimator {
        self.shared.state.lock().rtt.clone()
    }
}

impl HandshakeStateListener for RecoveryManager {
    fn handshake_state_changed(&self, new_state: HandshakeState) {
        let mut state = self.shared.state.lock();
        if state.stopped {
            return;
        }
        let old_state = state.handshake_state;
        state.handshake_state = new_state;
        if new_state == HandshakeState::Confirmed && old_state != HandshakeState::Confirmed {
            self.shared.set_loss_detection_timer(&mut state);
        }
    }
}

impl RecoveryShared {
    /// Re-derive the single timer deadline after an event.
    fn set_loss_detection_timer(&self, state: &mut RecoveryState) {
        let now = self.clock.now();

        if let Some((space, loss_time)) = Self::earliest(state, LossDetector::loss_time) {
            debug!(?space, "arming loss detection timer for pending loss time");
            self.arm(state, loss_time, now);
            return;
        }

        let ack_eliciting_in_flight = state
            .detectors
            .iter()
            .any(LossDetector::ack_eliciting_in_flight);
        let peer_awaiting_validation = Self::peer_awaiting_validation(state);
        if !ack_eliciting_in_flight && !peer_awaiting_validation {
            debug!("cancelling loss detection timer; nothing in flight, peer not awaiting validation");
            self.unschedule(state);
            return;
        }

        // The probe timeout is per packet number space: base it on the
        // space with the oldest outstanding ack-eliciting send.
        let (space, base) = match Self::earliest(state, LossDetector::last_ack_eliciting_sent) {
            Some(earliest) => earliest,
            None if peer_awaiting_validation => {
                // Initial space already discarded, but no ack-eliciting
                // Handshake packet has been sent while the peer still
                // awaits address validation.
                error!("missing last ack-eliciting sent time; substituting now in Handshake space");
                (PnSpace::Handshake, now)
            }
            None => {
                error!("ack-eliciting in flight but no ack-eliciting send time recorded; leaving timer unarmed");
                self.unschedule(state);
                return;
            }
        };

        // max_ack_delay only counts once the peer may actually delay
        // acks, i.e. in the application space.
        let max_ack_delay = if space == PnSpace::App {
            state.receiver_max_ack_delay_ms
        } else {
            0
        };
        let pto_ms = u64::from(state.rtt.smoothed_rtt())
            + (4 * u64::from(state.rtt.rtt_var())).max(self.config.granularity_ms)
            + max_ack_delay;
        let backoff = 1u64.checked_shl(state.pto_count).unwrap_or(u64::MAX);
        let pto_ms = pto_ms.saturating_mul(backoff);

        debug!(
            pto_ms,
            ?space,
            pto_count = state.pto_count,
            srtt = state.rtt.smoothed_rtt(),
            rttvar = state.rtt.rtt_var(),
            "arming probe timeout"
        );
        match base.checked_add(Duration::from_millis(pto_ms)) {
            Some(deadline) => self.arm(state, deadline, now),
            None => {
                warn!("probe timeout beyond representable time; leaving timer unarmed");
                self.unschedule(state);
            }
        }
    }

    fn arm(&self, state: &mut RecoveryState, deadline: Instant, now: Instant) {
        // Deadlines already in the past fire immediately
        let deadline = deadline.max(now);
        state.timer_expiration = Some(deadline);
        state.timer_generation = self.timer.schedule(deadline);
    }

    fn unschedule(&self, state: &mut RecoveryState) {
        state.timer_expiration = None;
        self.timer.cancel();
    }

    /// A client must keep probing until one of its Handshake or 1-RTT
    /// packets is acknowledged, while the server may still be
    /// ignoring traffic pending address validation.
    fn peer_awaiting_validation(state: &RecoveryState) -> bool {
        matches!(
            state.handshake_state,
            HandshakeState::Initial | HandshakeState::HasHandshakeKeys
        ) && state.detectors[idx(PnSpace::Handshake)].no_ack_received()
            && state.detectors[idx(PnSpace::App)].no_ack_received()
    }

    fn earliest<F>(state: &RecoveryState, f: F) -> Option<(PnSpace, Instant)>
    where
        F: Fn(&LossDetector) -> Option<Instant>,
    {
        let mut earliest: Option<(PnSpace, Instant)> = None;
        for space in PnSpace::ALL {
            if let Some(t) = f(&state.detectors[idx(space)]) {
                if earliest.map_or(true, |(_, cur)| t <= cur) {
                    earliest = Some((space, t));
                }
            }
        }
        earliest
    }

    /// Timer-fired entry point, running on the timer thread.
    fn on_loss_detection_timeout(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        if generation != state.timer_generation {
            warn!("stale loss detection timer fired; ignoring");
            return;
        }
        let now = self.clock.now();
        match state.timer_expiration {
            None => {
                warn!("loss detection timeout: timer was cancelled");
                return;
            }
            Some(expiration) if now < expiration => {
                warn!("loss detection timer fired early; ignoring");
                return;
            }
            Some(_) => {}
        }
        state.timer_expiration = None;

        if let Some((space, _)) = Self::earliest(&state, LossDetector::loss_time) {
            let st = &mut *state;
            let lost = st.detectors[idx(space)].detect_lost_packets(now, &st.rtt);
            self.set_loss_detection_timer(&mut state);
            drop(state);
            dispatch_lost(lost);
        } else {
            let plan = self.prepare_probe(&mut state);
            drop(state);
            if let Some(plan) = plan {
                self.emit_probe(plan);
            }
            // No re-arm here: the probe's own packet_sent event arms
            // the timer with the fresh ack-eliciting send time.
        }
    }

    /// Pick the probe to send on PTO expiration. Called under the
    /// lock; the send happens after release.
    fn prepare_probe(&self, state: &mut RecoveryState) -> Option<ProbePlan> {
        debug!(
            pto_count = state.pto_count,
            srtt = state.rtt.smoothed_rtt(),
            rttvar = state.rtt.rtt_var(),
            "probe timeout expired"
        );
        state.pto_count += 1;
        let count = if state.pto_count > 1 { 2 } else { 1 };

        if state.handshake_state.has_no_handshake_keys() {
            let initial = &state.detectors[idx(PnSpace::Initial)];
            if let Some(first_unacked) = initial.unacked().next() {
                // Client role: the whole Initial flight is resent, as
                // the packet will be padded anyway.
                debug!("probe is an initial retransmit");
                Some(ProbePlan {
                    frames: non_ack_frames(first_unacked),
                    level: EncryptionLevel::Initial,
                    count,
                })
            } else {
                // Happens when probing for peer address validation
                debug!("probe is an initial ping; no initial data to retransmit");
                Some(ProbePlan {
                    frames: ping_frames(),
                    level: EncryptionLevel::Initial,
                    count,
                })
            }
        } else if state.handshake_state.has_only_handshake_keys() {
            // With Handshake keys available the probe must be a
            // Handshake packet.
            let frames = frames_to_retransmit(&state.detectors[idx(PnSpace::Handshake)]);
            if frames.is_empty() {
                debug!("probe is a handshake ping");
                Some(ProbePlan {
                    frames: ping_frames(),
                    level: EncryptionLevel::Handshake,
                    count,
                })
            } else {
                debug!("probe is a handshake retransmit");
                Some(ProbePlan {
                    frames,
                    level: EncryptionLevel::Handshake,
                    count,
                })
            }
        } else if let Some((space, _)) =
            Self::earliest(state, LossDetector::last_ack_eliciting_sent)
        {
            let level = space.related_encryption_level();
            let frames = frames_to_retransmit(&state.detectors[idx(space)]);
            if frames.is_empty() {
                debug!(?level, "probe is a ping");
                Some(ProbePlan {
                    frames: ping_frames(),
                    level,
                    count,
                })
            } else {
                debug!(?level, "probe is a retransmit");
                Some(ProbePlan {
                    frames,
                    level,
                    count,
                })
            }
        } else {
            debug!("probe withdrawn; no last ack-eliciting packet");
            None
        }
    }

    fn emit_probe(&self, plan: ProbePlan) {
        for i in 0..plan.count {
            self.sender.send_probe(plan.frames.clone(), plan.level);
            if i + 1 < plan.count {
                // Small spacing between duplicate probes
                thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

fn dispatch_lost(lost: Vec<LostPacket>) {
    for LostPacket { packet, on_lost } in lost {
        on_lost(&packet);
    }
}

fn ping_frames() -> Vec<Frame> {
    vec![Frame::Ping, Frame::Padding(2)]
}

fn non_ack_frames(packet: &SentPacket) -> Vec<Frame> {
    packet
        .frames
        .iter()
        .filter(|f| !matches!(f, Frame::Ack(_)))
        .cloned()
        .collect()
}

/// First unacked, ack-eliciting, non-trivial packet's frames, minus
/// any ACK frames. Non-trivial excludes packets made of only PING,
/// PADDING and ACK.
fn frames_to_retransmit(detector: &LossDetector) -> Vec<Frame> {
    detector
        .unacked()
        .filter(|p| p.is_ack_eliciting())
        .find(|p| {
            !p.frames
                .iter()
                .all(|f| matches!(f, Frame::Ping | Frame::Padding(_) | Frame::Ack(_)))
        })
        .map(non_ack_frames)
        .unwrap_or_default()
}
