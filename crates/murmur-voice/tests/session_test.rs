//! End-to-end session tests against an in-memory transport: real Opus frames
//! in, placeholder providers in the middle, recorded playback out.

use async_trait::async_trait;
use audiopus::coder::Encoder;
use audiopus::{Application, Channels, SampleRate};
use murmur_core::{CaptureSettings, PipelineSettings, VoiceSettings};
use murmur_voice::{
    AsrProvider, PlaceholderAsr, PlaceholderChat, PlaceholderTts, PlayerState, TrackPlayer,
    TransportEvent, VoiceConnection, VoicePipeline, VoiceResult, VoiceSessionManager,
    VoiceTransport,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const USER: u64 = 7;
const CHANNEL: u64 = 42;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("murmur_voice=debug")
        .try_init();
}

#[derive(Default)]
struct MockPlayer {
    played: Mutex<Vec<Vec<u8>>>,
    stopped: AtomicBool,
}

impl MockPlayer {
    fn play_count(&self) -> usize {
        self.played.lock().unwrap().len()
    }
}

impl TrackPlayer for MockPlayer {
    fn play(&self, audio: Vec<u8>) -> VoiceResult<()> {
        self.played.lock().unwrap().push(audio);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct MockConnection {
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    player: Arc<MockPlayer>,
    disconnected: Arc<AtomicBool>,
}

#[async_trait]
impl VoiceConnection for MockConnection {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }

    fn player(&self) -> Arc<dyn TrackPlayer> {
        self.player.clone()
    }

    async fn disconnect(&mut self) -> VoiceResult<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// One joined connection as the test sees it: the event feed plus the
/// recording player.
struct JoinedLine {
    sender: mpsc::UnboundedSender<TransportEvent>,
    player: Arc<MockPlayer>,
    disconnected: Arc<AtomicBool>,
    self_deaf: bool,
}

#[derive(Default)]
struct MockTransport {
    lines: Mutex<Vec<Arc<JoinedLine>>>,
}

impl MockTransport {
    fn line(&self, index: usize) -> Arc<JoinedLine> {
        self.lines.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl VoiceTransport for MockTransport {
    async fn join(&self, _channel: u64, self_deaf: bool) -> VoiceResult<Box<dyn VoiceConnection>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let player = Arc::new(MockPlayer::default());
        let disconnected = Arc::new(AtomicBool::new(false));
        self.lines.lock().unwrap().push(Arc::new(JoinedLine {
            sender: tx,
            player: player.clone(),
            disconnected: disconnected.clone(),
            self_deaf,
        }));
        Ok(Box::new(MockConnection {
            events: Some(rx),
            player,
            disconnected,
        }))
    }
}

/// ASR double that counts calls and can hold each one open.
struct CountingAsr {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

#[async_trait]
impl AsrProvider for CountingAsr {
    fn name(&self) -> &str {
        "counting-asr"
    }

    async fn transcribe(&self, _wav: &[u8]) -> VoiceResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok("counted".to_string())
    }
}

fn settings() -> VoiceSettings {
    VoiceSettings {
        capture: CaptureSettings {
            silence_ms: 100,
            min_frame_bytes: 64,
            min_packet_count: 10,
            max_buffer_frames: 1000,
        },
        max_sessions: 1,
        ..VoiceSettings::default()
    }
}

fn placeholder_pipeline(audio: Vec<u8>) -> VoicePipeline {
    let mut pipeline = VoicePipeline::new(PipelineSettings::default());
    pipeline.push_asr(Box::new(PlaceholderAsr::with_transcript("hello there")));
    pipeline.push_chat(Box::new(PlaceholderChat::with_reply("General Kenobi.")));
    pipeline.push_tts(Box::new(PlaceholderTts::with_audio(audio)));
    pipeline
}

/// One real 20ms Opus packet (48 kHz stereo). Decodes to 3840 PCM bytes,
/// comfortably above the noise gate.
fn opus_packet() -> Vec<u8> {
    let encoder =
        Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Voip).expect("encoder");
    let samples: Vec<i16> = (0..960 * 2).map(|i| ((i % 200) as i16 - 100) * 20).collect();
    let mut packet = vec![0u8; 4000];
    let len = encoder.encode(&samples, &mut packet).expect("encode");
    packet.truncate(len);
    packet
}

fn send_burst(line: &JoinedLine, packets: usize) {
    line.sender
        .send(TransportEvent::SpeakingStart { user: USER })
        .unwrap();
    let packet = opus_packet();
    for _ in 0..packets {
        line.sender
            .send(TransportEvent::OpusFrame {
                user: USER,
                payload: packet.clone(),
            })
            .unwrap();
    }
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..150 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn utterance_flows_from_frames_to_playback() {
    init_tracing();
    let transport = MockTransport::default();
    let manager = VoiceSessionManager::new(settings(), placeholder_pipeline(vec![9u8; 256]));

    assert!(manager
        .join_and_listen(&transport, CHANNEL, USER)
        .await
        .unwrap());
    let line = transport.line(0);
    assert!(line.self_deaf);

    send_burst(&line, 12);
    wait_for("first playback", || line.player.play_count() == 1).await;
    assert_eq!(line.player.played.lock().unwrap()[0], vec![9u8; 256]);

    // Playback drains; capture re-arms and a second utterance goes through.
    line.sender
        .send(TransportEvent::Player(PlayerState::Playing))
        .unwrap();
    line.sender
        .send(TransportEvent::Player(PlayerState::Idle))
        .unwrap();
    send_burst(&line, 12);
    wait_for("second playback", || line.player.play_count() == 2).await;
}

#[tokio::test]
async fn short_bursts_are_discarded_as_noise() {
    let transport = MockTransport::default();
    let manager = VoiceSessionManager::new(settings(), placeholder_pipeline(vec![1u8; 8]));

    assert!(manager
        .join_and_listen(&transport, CHANNEL, USER)
        .await
        .unwrap());
    let line = transport.line(0);

    // Below min_packet_count: the pipeline never runs.
    send_burst(&line, 5);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(line.player.play_count(), 0);

    // The session is still healthy for a real utterance.
    send_burst(&line, 12);
    wait_for("playback after noise", || line.player.play_count() == 1).await;
}

#[tokio::test]
async fn speech_during_processing_is_dropped() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut pipeline = VoicePipeline::new(PipelineSettings::default());
    pipeline.push_asr(Box::new(CountingAsr {
        calls: calls.clone(),
        delay: Duration::from_millis(400),
    }));
    pipeline.push_chat(Box::new(PlaceholderChat::with_reply("ok")));
    pipeline.push_tts(Box::new(PlaceholderTts::with_audio(vec![1u8; 32])));

    let transport = MockTransport::default();
    let manager = VoiceSessionManager::new(settings(), pipeline);
    assert!(manager
        .join_and_listen(&transport, CHANNEL, USER)
        .await
        .unwrap());
    let line = transport.line(0);

    send_burst(&line, 12);
    wait_for("pipeline started", || calls.load(Ordering::SeqCst) == 1).await;

    // The user talks over the bot while the first turn is in flight.
    send_burst(&line, 12);
    wait_for("first playback", || line.player.play_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn join_is_refused_at_the_session_limit() {
    let transport = MockTransport::default();
    let manager = VoiceSessionManager::new(settings(), placeholder_pipeline(Vec::new()));

    assert!(manager
        .join_and_listen(&transport, CHANNEL, USER)
        .await
        .unwrap());
    // Same user again.
    assert!(!manager
        .join_and_listen(&transport, CHANNEL, USER)
        .await
        .unwrap());
    // A different user, but max_sessions is 1.
    assert!(!manager
        .join_and_listen(&transport, CHANNEL, USER + 1)
        .await
        .unwrap());
    assert_eq!(manager.active_sessions().await, 1);
}

#[tokio::test]
async fn leave_is_idempotent_and_disconnects() {
    let transport = MockTransport::default();
    let manager = VoiceSessionManager::new(settings(), placeholder_pipeline(Vec::new()));

    assert!(manager
        .join_and_listen(&transport, CHANNEL, USER)
        .await
        .unwrap());
    let line = transport.line(0);

    assert!(manager.leave(USER).await);
    assert!(!manager.leave(USER).await);
    wait_for("disconnect", || line.disconnected.load(Ordering::SeqCst)).await;
    assert_eq!(manager.active_sessions().await, 0);
}

#[tokio::test]
async fn transport_disconnect_tears_the_session_down() {
    let transport = MockTransport::default();
    let manager = VoiceSessionManager::new(settings(), placeholder_pipeline(Vec::new()));

    assert!(manager
        .join_and_listen(&transport, CHANNEL, USER)
        .await
        .unwrap());
    let line = transport.line(0);
    line.sender.send(TransportEvent::Disconnected).unwrap();

    wait_for("registry cleanup", || {
        line.disconnected.load(Ordering::SeqCst)
    })
    .await;
    for _ in 0..150 {
        if manager.active_sessions().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(manager.active_sessions().await, 0);

    // The user can rejoin after the teardown.
    assert!(manager
        .join_and_listen(&transport, CHANNEL, USER)
        .await
        .unwrap());
}
