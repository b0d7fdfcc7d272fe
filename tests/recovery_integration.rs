//! End-to-end recovery scenarios over the public API: the real timer
//! thread drives probe emission, and a probe sender feeds sent probes
//! back into the manager the way a connection's sender would.

use bytes::Bytes;
use quic_client_core::frames::{decode_ack_frame, decode_crypto_frame};
use quic_client_core::{
    AckFrame, Clock, CongestionAdvisor, CryptoFrame, CryptoStream, EncryptionLevel, Frame,
    HandshakeMessageParser, HandshakeState, HandshakeStateListener, ManualClock, MessageFraming,
    PnSpace, ProbeSender, RecoveryConfig, RecoveryManager, Result, SentPacket, SystemClock,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct NullAdvisor;

impl CongestionAdvisor for NullAdvisor {
    fn on_packet_sent(&self, _size: u32) {}
    fn on_packet_acked(&self, _size: u32) {}
    fn on_packets_lost(&self, _sizes: &[u32]) {}
    fn can_send(&self) -> bool {
        true
    }
}

/// Records probes and synchronously re-registers each probe as a sent
/// packet, as a connection's sender would.
struct EchoSender {
    manager: Mutex<Option<RecoveryManager>>,
    probes: Mutex<Vec<(Vec<Frame>, EncryptionLevel)>>,
    next_pn: AtomicU64,
}

impl Default for EchoSender {
    fn default() -> Self {
        Self {
            manager: Mutex::new(None),
            probes: Mutex::new(Vec::new()),
            // Leave room below for the packets the tests send directly
            next_pn: AtomicU64::new(100),
        }
    }
}

impl EchoSender {
    fn probe_count(&self) -> usize {
        self.probes.lock().len()
    }
}

impl ProbeSender for EchoSender {
    fn send_probe(&self, frames: Vec<Frame>, level: EncryptionLevel) {
        self.probes.lock().push((frames.clone(), level));
        if let Some(manager) = self.manager.lock().as_ref() {
            let pn = self.next_pn.fetch_add(1, Ordering::SeqCst);
            manager.packet_sent(
                SentPacket::new(pn, level, 1200, frames),
                Instant::now(),
                Box::new(|_| {}),
            );
        }
    }
}

fn crypto_packet(pn: u64, level: EncryptionLevel) -> SentPacket {
    SentPacket::new(
        pn,
        level,
        1200,
        vec![Frame::Crypto(CryptoFrame::new(
            0,
            Bytes::from_static(b"client hello"),
        ))],
    )
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// An unacknowledged handshake flight triggers a probe from the timer
/// thread, the probe re-arms with doubled backoff, and stopping
/// recovery silences everything.
#[test]
fn probe_timeout_fires_and_backs_off() {
    let sender = Arc::new(EchoSender::default());
    let manager = RecoveryManager::new(
        RecoveryConfig {
            // Short RTT so the test completes quickly: first PTO is
            // 20 + max(4 * 5, 1) = 40ms
            initial_rtt_ms: 20,
            ..RecoveryConfig::default()
        },
        Arc::new(NullAdvisor),
        sender.clone(),
        Arc::new(SystemClock),
    )
    .unwrap();
    *sender.manager.lock() = Some(manager.clone());

    manager.handshake_state_changed(HandshakeState::HasHandshakeKeys);
    manager.packet_sent(
        crypto_packet(0, EncryptionLevel::Handshake),
        Instant::now(),
        Box::new(|_| {}),
    );

    // First expiration: one probe
    assert!(wait_until(Duration::from_secs(2), || sender.probe_count() >= 1));
    assert!(manager.pto_count() >= 1);
    {
        let probes = sender.probes.lock();
        assert_eq!(probes[0].1, EncryptionLevel::Handshake);
        assert!(matches!(probes[0].0[0], Frame::Crypto(_)));
    }

    // The echoed probe re-armed the timer; backoff keeps it firing
    assert!(wait_until(Duration::from_secs(4), || sender.probe_count() >= 3));
    assert!(manager.pto_count() >= 2);

    manager.stop_recovery();
    let settled = sender.probe_count();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(sender.probe_count(), settled);
    assert!(manager.timer_expiration().is_none());
}

/// An acknowledged flight leaves the timer silent: no probes fire.
#[test]
fn acknowledged_flight_sends_no_probes() {
    let sender = Arc::new(EchoSender::default());
    let manager = RecoveryManager::new(
        RecoveryConfig {
            initial_rtt_ms: 20,
            ..RecoveryConfig::default()
        },
        Arc::new(NullAdvisor),
        sender.clone(),
        Arc::new(SystemClock),
    )
    .unwrap();
    *sender.manager.lock() = Some(manager.clone());

    manager.handshake_state_changed(HandshakeState::HasHandshakeKeys);
    manager.packet_sent(
        crypto_packet(0, EncryptionLevel::Handshake),
        Instant::now(),
        Box::new(|_| {}),
    );
    manager.on_ack_received(&AckFrame::new(0, 0), PnSpace::Handshake);

    assert!(manager.timer_expiration().is_none());
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(sender.probe_count(), 0);
}

/// Wire-format ACK frames drive RTT estimation, including the
/// exponent-scaled, plausibility-checked ack delay.
#[test]
fn ack_frames_from_wire_feed_rtt() {
    let sender = Arc::new(EchoSender::default());
    let clock = Arc::new(ManualClock::new());
    let manager = RecoveryManager::new(
        RecoveryConfig::default(),
        Arc::new(NullAdvisor),
        sender,
        clock.clone(),
    )
    .unwrap();
    manager.handshake_state_changed(HandshakeState::Confirmed);

    manager.packet_sent(
        crypto_packet(0, EncryptionLevel::App),
        clock.now(),
        Box::new(|_| {}),
    );
    clock.advance(100);
    // largest 0, ack_delay 0, no extra ranges, first range 0
    let (ack, _) = decode_ack_frame(&[0x02, 0x00, 0x00, 0x00, 0x00]).unwrap();
    manager.on_ack_received(&ack, PnSpace::App);
    assert_eq!(manager.rtt().smoothed_rtt(), 100);

    manager.packet_sent(
        crypto_packet(1, EncryptionLevel::App),
        clock.now(),
        Box::new(|_| {}),
    );
    clock.advance(200);
    // largest 1, ack_delay 1000 raw = 8ms after the default exponent;
    // 200 > min_rtt(100) + 8, so the sample is adjusted to 192
    let (ack, _) = decode_ack_frame(&[0x02, 0x01, 0x43, 0xe8, 0x00, 0x00]).unwrap();
    assert_eq!(ack.ack_delay, 1000);
    manager.on_ack_received(&ack, PnSpace::App);
    // smoothed = (7 * 100 + 192) / 8 = 111
    assert_eq!(manager.rtt().smoothed_rtt(), 111);
    assert_eq!(manager.rtt().latest_rtt(), 200);
}

/// CRYPTO frames decoded from the wire reassemble into parsed
/// handshake messages even when they arrive out of order.
#[test]
fn wire_crypto_frames_reassemble_into_messages() {
    struct RecordParser;
    impl HandshakeMessageParser for RecordParser {
        type Message = Vec<u8>;
        fn parse(&mut self, record: Bytes) -> Result<Vec<u8>> {
            Ok(record.slice(4..).to_vec())
        }
    }

    let mut stream = CryptoStream::new(
        EncryptionLevel::Handshake,
        MessageFraming::length_prefixed(4),
        RecordParser,
    );

    // One 6-byte message: length prefix 00000006 + "abcdef",
    // delivered as two CRYPTO frames in reverse order
    let mut tail = vec![0x06, 0x05, 0x05]; // type, offset 5, length 5
    tail.extend_from_slice(b"bcdef");
    let mut head = vec![0x06, 0x00, 0x05]; // type, offset 0, length 5
    head.extend_from_slice(&[0x00, 0x00, 0x00, 0x06, b'a']);

    let (frame, _) = decode_crypto_frame(&Bytes::from(tail)).unwrap();
    stream.add(frame).unwrap();
    assert!(stream.messages().is_empty());

    let (frame, _) = decode_crypto_frame(&Bytes::from(head)).unwrap();
    stream.add(frame).unwrap();
    assert_eq!(stream.messages(), [b"abcdef".to_vec()]);
}
