use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use voxturn_lib::capture::{CaptureDevice, CaptureStream};
use voxturn_lib::controller::VoiceTurnController;
use voxturn_lib::playback::{AudioOutput, PlaybackEvent, PlaybackEvents};
use voxturn_lib::transport::TurnTransport;
use voxturn_lib::voxturn_core::error::{CaptureError, PlaybackError, TransportError};
use voxturn_lib::voxturn_core::types::{
    ClientConfig, ClipId, TextTurnRequest, TurnEvent, TurnPhase, VoiceTurnRequest,
};

// ─── Fakes ────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct FakeMic {
    fail: bool,
    acquisitions: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    feeds: Arc<Mutex<Vec<mpsc::UnboundedSender<Vec<i16>>>>>,
}

impl FakeMic {
    fn feed(&self, samples: Vec<i16>) {
        let feeds = self.feeds.lock().unwrap();
        feeds.last().unwrap().send(samples).unwrap();
    }
}

impl CaptureDevice for FakeMic {
    fn acquire(&mut self, interval: Duration) -> Result<CaptureStream, CaptureError> {
        if self.fail {
            return Err(CaptureError::NoDevice);
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().unwrap().push(tx);
        let releases = self.releases.clone();
        Ok(CaptureStream::new(rx, interval, move || {
            releases.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

#[derive(Clone)]
struct FakeTransport {
    reply: Result<Value, u16>,
    gate: Option<Arc<Notify>>,
    posts: Arc<Mutex<Vec<(Instant, VoiceTurnRequest)>>>,
}

impl FakeTransport {
    fn replying(reply: Value) -> Self {
        Self {
            reply: Ok(reply),
            gate: None,
            posts: Arc::default(),
        }
    }

    fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }
}

#[async_trait]
impl TurnTransport for FakeTransport {
    async fn post_voice(&self, request: VoiceTurnRequest) -> Result<Value, TransportError> {
        self.posts.lock().unwrap().push((Instant::now(), request));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.reply.clone().map_err(TransportError::Status)
    }

    async fn post_text(&self, _: &TextTurnRequest) -> Result<Value, TransportError> {
        Err(TransportError::Status(405))
    }

    async fn fetch_status(&self) -> Result<Value, TransportError> {
        Ok(json!({}))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum OutputCall {
    Load(ClipId, String, f32),
    Stop(ClipId),
}

#[derive(Clone, Default)]
struct FakeOutput {
    broken: bool,
    calls: Arc<Mutex<Vec<OutputCall>>>,
}

impl AudioOutput for FakeOutput {
    fn load(&mut self, clip: ClipId, url: &str, rate: f32, events: PlaybackEvents) {
        self.calls
            .lock()
            .unwrap()
            .push(OutputCall::Load(clip, url.to_string(), rate));
        let event = if self.broken {
            PlaybackEvent::Failed {
                clip,
                error: PlaybackError::Decode("unsupported".into()),
            }
        } else {
            PlaybackEvent::Started { clip }
        };
        let _ = events.send(event);
    }

    fn stop(&mut self, clip: ClipId) {
        self.calls.lock().unwrap().push(OutputCall::Stop(clip));
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────

fn config() -> ClientConfig {
    ClientConfig {
        // 16 samples per fragment
        fragment_interval_ms: 1,
        ..Default::default()
    }
}

fn spawn(
    mic: &FakeMic,
    transport: &FakeTransport,
    output: &FakeOutput,
) -> (VoiceTurnController, mpsc::UnboundedReceiver<TurnEvent>) {
    VoiceTurnController::spawn(
        config(),
        Box::new(mic.clone()),
        Arc::new(transport.clone()),
        Box::new(output.clone()),
    )
}

/// Next event, skipping level meter updates.
async fn next(rx: &mut mpsc::UnboundedReceiver<TurnEvent>) -> TurnEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("controller stopped");
        if !matches!(event, TurnEvent::Level { .. }) {
            return event;
        }
    }
}

async fn quiet(rx: &mut mpsc::UnboundedReceiver<TurnEvent>) -> bool {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Err(_) => return true,
            Ok(Some(TurnEvent::Level { .. })) => continue,
            Ok(_) => return false,
        }
    }
}

async fn run_turn_to_posting(ctl: &VoiceTurnController, rx: &mut mpsc::UnboundedReceiver<TurnEvent>) {
    ctl.start();
    assert_eq!(next(rx).await, TurnEvent::RecordingStarted);
    tokio::time::sleep(Duration::from_millis(1300)).await;
    ctl.stop();
    assert!(matches!(next(rx).await, TurnEvent::Posting { .. }));
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn early_stop_is_deferred_to_minimum_capture() {
    let mic = FakeMic::default();
    let transport = FakeTransport::replying(json!({"answer": "hello"}));
    let output = FakeOutput::default();
    let (ctl, mut rx) = spawn(&mic, &transport, &output);

    let t0 = Instant::now();
    ctl.start();
    assert_eq!(next(&mut rx).await, TurnEvent::RecordingStarted);

    tokio::time::sleep(Duration::from_millis(200)).await;
    ctl.stop();
    let TurnEvent::StopArmed { wait_ms } = next(&mut rx).await else {
        panic!("expected StopArmed");
    };
    assert!(wait_ms <= 1000 && wait_ms > 900);
    assert_eq!(ctl.status().phase, TurnPhase::StopArmed);

    assert!(matches!(next(&mut rx).await, TurnEvent::Posting { .. }));
    let posted_at = transport.posts.lock().unwrap()[0].0;
    assert!(posted_at - t0 >= Duration::from_millis(1200));
}

#[tokio::test(start_paused = true)]
async fn finalize_and_post_runs_once_per_turn() {
    let mic = FakeMic::default();
    let transport = FakeTransport::replying(json!({"answer": "hello"}));
    let output = FakeOutput::default();
    let (ctl, mut rx) = spawn(&mic, &transport, &output);

    ctl.start();
    assert_eq!(next(&mut rx).await, TurnEvent::RecordingStarted);
    ctl.stop();
    ctl.stop();
    ctl.stop();
    assert!(matches!(next(&mut rx).await, TurnEvent::StopArmed { .. }));
    assert!(matches!(next(&mut rx).await, TurnEvent::Posting { .. }));
    ctl.stop();

    assert!(matches!(next(&mut rx).await, TurnEvent::Answer { .. }));
    assert_eq!(next(&mut rx).await, TurnEvent::NoAudio);
    assert_eq!(next(&mut rx).await, TurnEvent::TurnFinished { ok: true });
    ctl.stop();
    assert!(quiet(&mut rx).await);

    assert_eq!(transport.post_count(), 1);
    assert_eq!(mic.releases.load(Ordering::SeqCst), 1);
    let status = ctl.status();
    assert_eq!(status.phase, TurnPhase::Done);
    assert_eq!(status.turns_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn start_is_refused_while_turn_in_flight() {
    let mic = FakeMic::default();
    let gate = Arc::new(Notify::new());
    let transport = FakeTransport {
        gate: Some(gate.clone()),
        ..FakeTransport::replying(json!({"text": "later"}))
    };
    let output = FakeOutput::default();
    let (ctl, mut rx) = spawn(&mic, &transport, &output);

    run_turn_to_posting(&ctl, &mut rx).await;
    assert!(ctl.status().busy);

    ctl.start();
    assert_eq!(next(&mut rx).await, TurnEvent::StartIgnored);
    assert_eq!(mic.acquisitions.load(Ordering::SeqCst), 1);

    gate.notify_one();
    assert_eq!(
        next(&mut rx).await,
        TurnEvent::Answer {
            text: "later".into(),
            breadcrumb: None
        }
    );
    assert_eq!(next(&mut rx).await, TurnEvent::NoAudio);
    assert_eq!(next(&mut rx).await, TurnEvent::TurnFinished { ok: true });
    assert!(!ctl.status().busy);

    ctl.start();
    assert_eq!(next(&mut rx).await, TurnEvent::RecordingStarted);
    assert_eq!(mic.acquisitions.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn captured_audio_is_posted_as_one_payload() {
    let mic = FakeMic::default();
    let transport = FakeTransport::replying(json!({}));
    let output = FakeOutput::default();
    let (ctl, mut rx) = spawn(&mic, &transport, &output);

    ctl.start();
    assert_eq!(next(&mut rx).await, TurnEvent::RecordingStarted);
    mic.feed(vec![100; 20]);
    mic.feed(vec![-100; 30]);
    tokio::time::sleep(Duration::from_millis(1300)).await;
    mic.feed(vec![7; 5]);
    ctl.stop();

    assert_eq!(
        next(&mut rx).await,
        TurnEvent::Posting {
            bytes: 44 + 2 * 55
        }
    );
    let posts = transport.posts.lock().unwrap();
    let request = &posts[0].1;
    assert_eq!(request.lang, "en");
    assert_eq!(&request.audio[0..4], b"RIFF");
    assert_eq!(i16::from_le_bytes([request.audio[44], request.audio[45]]), 100);
    let last = request.audio.len() - 2;
    assert_eq!(i16::from_le_bytes([request.audio[last], request.audio[last + 1]]), 7);
}

#[tokio::test(start_paused = true)]
async fn device_failure_stays_idle() {
    let mic = FakeMic {
        fail: true,
        ..Default::default()
    };
    let transport = FakeTransport::replying(json!({}));
    let output = FakeOutput::default();
    let (ctl, mut rx) = spawn(&mic, &transport, &output);

    ctl.start();
    assert!(matches!(next(&mut rx).await, TurnEvent::DeviceError { .. }));
    assert_eq!(ctl.status().phase, TurnPhase::Idle);

    ctl.stop();
    assert!(quiet(&mut rx).await);
    assert_eq!(transport.post_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn transport_error_fails_turn_without_retry() {
    let mic = FakeMic::default();
    let transport = FakeTransport {
        reply: Err(502),
        ..FakeTransport::replying(json!({}))
    };
    let output = FakeOutput::default();
    let (ctl, mut rx) = spawn(&mic, &transport, &output);

    run_turn_to_posting(&ctl, &mut rx).await;
    assert_eq!(
        next(&mut rx).await,
        TurnEvent::TurnFailed {
            chip: "HTTP_502".into()
        }
    );
    assert_eq!(next(&mut rx).await, TurnEvent::TurnFinished { ok: false });
    assert_eq!(ctl.status().phase, TurnPhase::Failed);
    assert!(quiet(&mut rx).await);
    assert_eq!(transport.post_count(), 1);

    ctl.start();
    assert_eq!(next(&mut rx).await, TurnEvent::RecordingStarted);
}

#[tokio::test(start_paused = true)]
async fn response_is_normalized_and_played() {
    let mic = FakeMic::default();
    let transport = FakeTransport::replying(json!({
        "stt_text": "how are you",
        "answer_tts": "I am well",
        "answer": "ignored",
        "route": "chat",
        "timings": {"total_ms": 2500},
        "tts_path": "artifacts/clips/x.wav",
    }));
    let output = FakeOutput::default();
    let (ctl, mut rx) = spawn(&mic, &transport, &output);

    run_turn_to_posting(&ctl, &mut rx).await;
    assert_eq!(
        next(&mut rx).await,
        TurnEvent::Transcript {
            text: "how are you".into()
        }
    );
    let TurnEvent::Answer { text, breadcrumb } = next(&mut rx).await else {
        panic!("expected Answer");
    };
    assert_eq!(text, "I am well");
    assert_eq!(breadcrumb.unwrap().to_string(), "route=chat • t=2.5s");
    assert_eq!(
        next(&mut rx).await,
        TurnEvent::NowPlaying {
            clip: 1,
            caption: "Now Playing — I am well".into()
        }
    );
    assert_eq!(next(&mut rx).await, TurnEvent::TurnFinished { ok: true });

    let calls = output.calls.lock().unwrap().clone();
    let [OutputCall::Load(1, url, rate)] = calls.as_slice() else {
        panic!("unexpected output calls: {calls:?}");
    };
    assert!(url.starts_with("/media/clips/x.wav?v="));
    assert_eq!(*rate, 0.92);
}

#[tokio::test(start_paused = true)]
async fn playback_error_offers_single_retry() {
    let mic = FakeMic::default();
    let transport = FakeTransport::replying(json!({"answer": "hi", "tts_url": "/media/a.wav"}));
    let output = FakeOutput {
        broken: true,
        ..Default::default()
    };
    let (ctl, mut rx) = spawn(&mic, &transport, &output);

    run_turn_to_posting(&ctl, &mut rx).await;
    assert!(matches!(next(&mut rx).await, TurnEvent::Answer { .. }));
    assert!(matches!(next(&mut rx).await, TurnEvent::NowPlaying { clip: 1, .. }));

    let mut rest = Vec::new();
    for _ in 0..3 {
        rest.push(next(&mut rx).await);
    }
    assert!(rest.contains(&TurnEvent::TurnFinished { ok: true }));
    assert!(rest.contains(&TurnEvent::AudioUnavailable { clip: 1 }));
    assert!(rest.contains(&TurnEvent::RetryOffered { clip: 1 }));

    ctl.retry_audio();
    assert_eq!(next(&mut rx).await, TurnEvent::AudioUnavailable { clip: 1 });
    assert!(quiet(&mut rx).await);

    let calls = output.calls.lock().unwrap().clone();
    let Some(OutputCall::Load(1, url, _)) = calls.last() else {
        panic!("expected retry load");
    };
    assert!(url.starts_with("/media/a.wav?retry="));
    // turn state is untouched by playback failures
    assert_eq!(ctl.status().phase, TurnPhase::Done);
}

#[tokio::test(start_paused = true)]
async fn new_turn_clears_previous_clip() {
    let mic = FakeMic::default();
    let transport = FakeTransport::replying(json!({"answer": "one", "tts_url": "/media/1.wav"}));
    let output = FakeOutput::default();
    let (ctl, mut rx) = spawn(&mic, &transport, &output);

    run_turn_to_posting(&ctl, &mut rx).await;
    assert!(matches!(next(&mut rx).await, TurnEvent::Answer { .. }));
    assert!(matches!(next(&mut rx).await, TurnEvent::NowPlaying { clip: 1, .. }));
    assert_eq!(next(&mut rx).await, TurnEvent::TurnFinished { ok: true });

    ctl.start();
    assert_eq!(next(&mut rx).await, TurnEvent::AudioCleared { clip: 1 });
    assert_eq!(next(&mut rx).await, TurnEvent::RecordingStarted);
    assert_eq!(output.calls.lock().unwrap().last(), Some(&OutputCall::Stop(1)));
}
