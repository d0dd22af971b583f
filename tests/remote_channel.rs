//! Remote recognition channel against in-memory links and a loopback
//! WebSocket server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::channel::mpsc as link_mpsc;
use futures::{SinkExt, StreamExt};
use guitar_trainer::audio::{FixtureCaptureBackend, FIXTURE_SAMPLE_RATE};
use guitar_trainer::clock::ManualTimeSource;
use guitar_trainer::error::ChannelError;
use guitar_trainer::remote::{
    BackoffPolicy, ChannelEvent, ChannelStatus, CoachingFeedback, RemoteChordResult,
    RemoteRecognitionChannel, Transport, TransportLink, WebSocketTransport,
};
use guitar_trainer::{
    AppConfig, ChordEvent, FeatureWindow, Outcome, RecognitionMode, Session, SessionOptions,
};
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(3);

/// Test-side end of one in-memory link
struct Peer {
    session_id: String,
    outbound: mpsc::Receiver<String>,
    inbound: link_mpsc::UnboundedSender<Result<String, ChannelError>>,
}

impl Peer {
    fn push(&self, value: Value) {
        self.push_raw(&value.to_string());
    }

    /// Silently dropped once the channel has let go of the link
    fn push_raw(&self, text: &str) {
        let _ = self.inbound.unbounded_send(Ok(text.to_string()));
    }

    fn next_outbound(&self) -> Value {
        let text = self.outbound.recv_timeout(WAIT).expect("outbound frame");
        serde_json::from_str(&text).expect("outbound JSON")
    }
}

/// Transport handing every opened link to the test through `peers`
struct MockTransport {
    refuse_first: usize,
    attempts: AtomicUsize,
    peers: Mutex<mpsc::Sender<Peer>>,
}

impl MockTransport {
    fn new(refuse_first: usize) -> (Arc<Self>, mpsc::Receiver<Peer>) {
        let (tx, rx) = mpsc::channel();
        let transport = Arc::new(Self {
            refuse_first,
            attempts: AtomicUsize::new(0),
            peers: Mutex::new(tx),
        });
        (transport, rx)
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, session_id: &str) -> Result<TransportLink, ChannelError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.refuse_first {
            return Err(ChannelError::ConnectFailed {
                url: self.endpoint(),
                reason: "connection refused".to_string(),
            });
        }

        let (out_tx, out_rx) = mpsc::channel::<String>();
        let (in_tx, in_rx) = link_mpsc::unbounded();
        let sink = futures::sink::unfold(out_tx, |tx, text: String| async move {
            tx.send(text).map_err(|e| ChannelError::SendFailed {
                reason: e.to_string(),
            })?;
            Ok::<_, ChannelError>(tx)
        });

        let peer = Peer {
            session_id: session_id.to_string(),
            outbound: out_rx,
            inbound: in_tx,
        };
        let _ = self.peers.lock().unwrap().send(peer);

        Ok(TransportLink {
            sink: Box::pin(sink),
            stream: Box::pin(in_rx),
        })
    }

    fn endpoint(&self) -> String {
        "mock://recognizer".to_string()
    }
}

fn fast_policy() -> BackoffPolicy {
    BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(40))
}

fn create_channel(
    transport: Arc<dyn Transport>,
) -> (RemoteRecognitionChannel, mpsc::Receiver<ChannelEvent>) {
    let channel = RemoteRecognitionChannel::new(transport, fast_policy());
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    channel.on_result(move |event| {
        let _ = tx.lock().unwrap().send(event);
    });
    (channel, rx)
}

fn window(sequence_number: u64) -> FeatureWindow {
    FeatureWindow {
        captured_at_ms: sequence_number * 16,
        samples: vec![0.0; 12],
        sequence_number,
    }
}

fn wait_for_status(channel: &RemoteRecognitionChannel, status: ChannelStatus) {
    let deadline = Instant::now() + WAIT;
    while channel.status() != status {
        assert!(Instant::now() < deadline, "timed out waiting for {:?}", status);
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_connect_send_and_receive() {
    let (transport, peers) = MockTransport::new(0);
    let (mut channel, events) = create_channel(transport);

    channel.connect("session-a").unwrap();
    let peer = peers.recv_timeout(WAIT).unwrap();
    assert_eq!(peer.session_id, "session-a");
    assert_eq!(events.recv_timeout(WAIT).unwrap(), ChannelEvent::Connected);
    wait_for_status(&channel, ChannelStatus::Connected);

    channel.send(&window(7));
    let frame = peer.next_outbound();
    assert_eq!(frame["type"], "audio_window");
    assert_eq!(frame["sequenceNumber"], 7);
    assert_eq!(frame["sessionId"], "session-a");
    assert_eq!(frame["samples"].as_array().unwrap().len(), 12);

    // Results may come back out of order and more than once
    peer.push(json!({"type": "chord_result", "sequenceNumber": 8, "chordLabel": "G", "confidence": 0.7}));
    peer.push(json!({"type": "chord_result", "sequenceNumber": 5, "chordLabel": "C", "confidence": 0.9}));
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        ChannelEvent::Result(RemoteChordResult {
            sequence_number: 8,
            chord_label: "G".to_string(),
            confidence: 0.7,
        })
    );
    assert!(matches!(
        events.recv_timeout(WAIT).unwrap(),
        ChannelEvent::Result(RemoteChordResult { sequence_number: 5, .. })
    ));

    assert!(matches!(
        channel.connect("session-b"),
        Err(ChannelError::AlreadyConnected)
    ));
    channel.disconnect();
}

#[test]
fn test_malformed_payloads_are_discarded() {
    let (transport, peers) = MockTransport::new(0);
    let (mut channel, events) = create_channel(transport);
    channel.connect("session-a").unwrap();
    let peer = peers.recv_timeout(WAIT).unwrap();
    assert_eq!(events.recv_timeout(WAIT).unwrap(), ChannelEvent::Connected);

    peer.push_raw("{ not json");
    peer.push(json!({"type": "chord_result", "sequenceNumber": 1, "chordLabel": "C", "confidence": 1.5}));
    peer.push(json!({"type": "mystery"}));
    peer.push(json!({"type": "feedback", "message": "Relax your wrist", "score": 82.5}));

    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        ChannelEvent::Feedback(CoachingFeedback {
            message: "Relax your wrist".to_string(),
            score: Some(82.5),
        })
    );
    assert_eq!(channel.status(), ChannelStatus::Connected);
    channel.disconnect();
}

#[test]
fn test_lost_link_degrades_and_reconnects_with_same_session() {
    let (transport, peers) = MockTransport::new(0);
    let (mut channel, events) = create_channel(transport);
    channel.connect("session-a").unwrap();
    let first = peers.recv_timeout(WAIT).unwrap();
    assert_eq!(events.recv_timeout(WAIT).unwrap(), ChannelEvent::Connected);

    drop(first);
    assert!(matches!(
        events.recv_timeout(WAIT).unwrap(),
        ChannelEvent::Degraded { .. }
    ));

    let second = peers.recv_timeout(WAIT).unwrap();
    assert_eq!(second.session_id, "session-a");
    assert_eq!(events.recv_timeout(WAIT).unwrap(), ChannelEvent::Connected);
    wait_for_status(&channel, ChannelStatus::Connected);
    channel.disconnect();
}

#[test]
fn test_unreachable_backend_degrades_once_per_outage() {
    let (transport, peers) = MockTransport::new(3);
    let (mut channel, events) = create_channel(transport.clone());
    channel.connect("session-a").unwrap();

    assert!(matches!(
        events.recv_timeout(WAIT).unwrap(),
        ChannelEvent::Degraded { .. }
    ));
    // Three refusals, then a link: the next event is the reconnect
    let _peer = peers.recv_timeout(WAIT).unwrap();
    assert_eq!(events.recv_timeout(WAIT).unwrap(), ChannelEvent::Connected);
    assert_eq!(transport.attempts(), 4);
    channel.disconnect();
}

#[test]
fn test_no_events_after_disconnect() {
    let (transport, peers) = MockTransport::new(0);
    let (mut channel, events) = create_channel(transport);
    channel.connect("session-a").unwrap();
    let peer = peers.recv_timeout(WAIT).unwrap();
    assert_eq!(events.recv_timeout(WAIT).unwrap(), ChannelEvent::Connected);

    channel.disconnect();
    channel.disconnect();
    assert_eq!(channel.status(), ChannelStatus::Disconnected);
    assert!(channel.session_id().is_none());

    peer.push(json!({"type": "feedback", "message": "late"}));
    assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_send_before_connected_is_dropped() {
    let (transport, _peers) = MockTransport::new(usize::MAX);
    let (mut channel, _events) = create_channel(transport);

    // Not connected yet: nothing queued, nothing blocks
    channel.send(&window(0));
    channel.connect("session-a").unwrap();
    channel.send(&window(1));
    channel.disconnect();
}

#[test]
fn test_websocket_loopback_echoes_results() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let listener = runtime
        .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
        .unwrap();
    let addr = listener.local_addr().unwrap();

    // Answers every window with a C result echoing its sequence number
    runtime.spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = socket.next().await {
            let Ok(text) = message.to_text() else { continue };
            let Ok(frame) = serde_json::from_str::<Value>(text) else { continue };
            let reply = json!({
                "type": "chord_result",
                "sequenceNumber": frame["sequenceNumber"],
                "chordLabel": "C",
                "confidence": 0.8,
            });
            let _ = socket
                .send(tokio_tungstenite::tungstenite::Message::Text(reply.to_string()))
                .await;
        }
    });

    let transport = Arc::new(WebSocketTransport::new(format!("ws://{}/recognize", addr)));
    let (mut channel, events) = create_channel(transport);
    channel.connect("loopback").unwrap();
    assert_eq!(events.recv_timeout(WAIT).unwrap(), ChannelEvent::Connected);
    wait_for_status(&channel, ChannelStatus::Connected);

    channel.send(&window(3));
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        ChannelEvent::Result(RemoteChordResult {
            sequence_number: 3,
            chord_label: "C".to_string(),
            confidence: 0.8,
        })
    );
    channel.disconnect();
}

#[test]
fn test_session_judges_remote_results_by_capture_time() {
    let (transport, peers) = MockTransport::new(0);
    let source = Arc::new(ManualTimeSource::new());
    let mut session = Session::new(
        Box::new(FixtureCaptureBackend::silence(FIXTURE_SAMPLE_RATE)),
        AppConfig::default(),
    )
    .with_time_source(source.clone())
    .with_transport(transport);

    let options = SessionOptions {
        recognition_mode: RecognitionMode::Remote,
        ..SessionOptions::default()
    };
    session
        .start(vec![ChordEvent::new(1, "G", 500, 1000)], options)
        .unwrap();

    // The backend hears a G in every window and says so
    let peer = peers.recv_timeout(WAIT).unwrap();
    let responder = thread::spawn(move || {
        peer.push(json!({"type": "feedback", "message": "Nice tone"}));
        while let Ok(text) = peer.outbound.recv_timeout(WAIT) {
            let frame: Value = serde_json::from_str(&text).unwrap();
            peer.push(json!({
                "type": "chord_result",
                "sequenceNumber": frame["sequenceNumber"],
                "chordLabel": "G",
                "confidence": 0.95,
            }));
        }
    });

    let deadline = Instant::now() + WAIT;
    while session.tick().channel_status != ChannelStatus::Connected {
        assert!(Instant::now() < deadline, "session never saw the link come up");
        thread::sleep(Duration::from_millis(5));
    }

    source.set_ms(1000);
    let deadline = Instant::now() + WAIT;
    while session.verdicts().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
        session.tick();
    }

    assert_eq!(session.verdicts().len(), 1);
    let verdict = &session.verdicts()[0];
    assert_eq!(verdict.outcome, Outcome::Perfect);
    assert_eq!(verdict.timing_delta_ms, 0);
    assert_eq!(verdict.confidence, 0.95);
    assert_eq!(
        session.published().last_feedback.map(|feedback| feedback.message),
        Some("Nice tone".to_string())
    );

    session.stop();
    responder.join().unwrap();
}

fn chord_session(transport: Arc<MockTransport>) -> (Session, Arc<ManualTimeSource>) {
    let source = Arc::new(ManualTimeSource::new());
    let session = Session::new(
        Box::new(FixtureCaptureBackend::chord("G", FIXTURE_SAMPLE_RATE).unwrap()),
        AppConfig::default(),
    )
    .with_time_source(source.clone())
    .with_transport(transport);
    (session, source)
}

#[test]
fn test_remote_mode_judges_locally_while_degraded() {
    let (transport, _peers) = MockTransport::new(usize::MAX);
    let (mut session, source) = chord_session(transport.clone());
    let options = SessionOptions {
        recognition_mode: RecognitionMode::Remote,
        ..SessionOptions::default()
    };
    session
        .start(vec![ChordEvent::new(1, "G", 500, 1000)], options)
        .unwrap();

    let deadline = Instant::now() + WAIT;
    while session.tick().channel_status != ChannelStatus::Degraded {
        assert!(Instant::now() < deadline, "channel never degraded");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(transport.attempts() >= 1);

    source.set_ms(1000);
    let deadline = Instant::now() + WAIT;
    while session.verdicts().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
        session.tick();
    }

    assert_eq!(session.verdicts().len(), 1);
    let verdict = &session.verdicts()[0];
    assert_eq!(verdict.outcome, Outcome::Perfect);
    assert!(verdict.confidence >= 0.65);
    assert_eq!(session.published().channel_status, ChannelStatus::Degraded);
    session.stop();
}

#[test]
fn test_hybrid_mode_judges_each_event_once() {
    let (transport, peers) = MockTransport::new(0);
    let (mut session, source) = chord_session(transport);
    session
        .start(vec![ChordEvent::new(1, "G", 500, 1000)], SessionOptions::default())
        .unwrap();
    assert_eq!(session.options().recognition_mode, RecognitionMode::Hybrid);

    // The backend agrees with the local classifier on every window
    let answered = Arc::new(AtomicUsize::new(0));
    let peer = peers.recv_timeout(WAIT).unwrap();
    let responder = {
        let answered = Arc::clone(&answered);
        thread::spawn(move || {
            while let Ok(text) = peer.outbound.recv_timeout(WAIT) {
                let frame: Value = serde_json::from_str(&text).unwrap();
                peer.push(json!({
                    "type": "chord_result",
                    "sequenceNumber": frame["sequenceNumber"],
                    "chordLabel": "G",
                    "confidence": 0.95,
                }));
                answered.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let deadline = Instant::now() + WAIT;
    while session.tick().channel_status != ChannelStatus::Connected {
        assert!(Instant::now() < deadline, "session never saw the link come up");
        thread::sleep(Duration::from_millis(5));
    }

    source.set_ms(1000);
    let deadline = Instant::now() + WAIT;
    while session.verdicts().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
        session.tick();
    }
    assert_eq!(session.verdicts().len(), 1);

    // Both recognizers keep reporting G for the same event; none of it counts twice
    let heard = answered.load(Ordering::SeqCst);
    let deadline = Instant::now() + WAIT;
    while answered.load(Ordering::SeqCst) < heard + 5 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
        session.tick();
    }
    session.tick();
    assert!(answered.load(Ordering::SeqCst) >= heard + 5);

    assert_eq!(session.verdicts().len(), 1);
    let state = session.state();
    assert_eq!(state.perfect_count, 1);
    assert_eq!(state.judged_count(), 1);

    session.stop();
    responder.join().unwrap();
}
