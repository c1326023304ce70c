//! Voice turn controller — capture → post → normalize → play, one turn at a time.
//!
//! ```text
//! start() / stop() / retry_audio() → [cmd_tx] → turn worker (single task)
//!     ├─ capture fragments  → TurnMachine (append)
//!     ├─ deferred stop timer → TurnMachine (deadline_reached)
//!     ├─ post task result    → normalize → PlaybackManager | text-only
//!     └─ playback events     → PlaybackManager (caption, retry control)
//! ```
//!
//! Every transition happens inside the worker's event loop, so there is no
//! parallel mutation of turn state. The [`TurnMachine`] phase is the only
//! guard: a start while a post is unresolved is refused (not queued), and the
//! finalize-and-post step runs at most once per turn.
//!
//! Capture is finalized before posting: the device is released and every
//! buffered fragment appended before the payload is encoded.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use voxturn_core::error::TransportError;
use voxturn_core::media::now_millis;
use voxturn_core::normalize::normalize;
use voxturn_core::turn::{StopDecision, TurnMachine};
use voxturn_core::types::{
    Caption, ClientConfig, TurnEvent, TurnPhase, TurnStatus, VoiceTurnRequest,
};
use voxturn_core::wav::{compute_rms, duration_ms, encode_wav, SAMPLE_RATE};

use crate::capture::{CaptureDevice, CaptureStream};
use crate::playback::{AudioOutput, PlaybackEvent, PlaybackManager};
use crate::transport::TurnTransport;

/// Cloneable handle to the turn worker. All methods are non-blocking.
#[derive(Clone)]
pub struct VoiceTurnController {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    status_rx: watch::Receiver<TurnStatus>,
}

enum Cmd {
    Start,
    Stop,
    RetryAudio,
    ReplayAudio,
    SetLanguage(String),
}

impl VoiceTurnController {
    /// Spawn the turn worker. Returns the handle and the presentation event stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: ClientConfig,
        device: Box<dyn CaptureDevice>,
        transport: Arc<dyn TurnTransport>,
        output: Box<dyn AudioOutput>,
    ) -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(TurnStatus {
            phase: TurnPhase::Idle,
            busy: false,
            turns_completed: 0,
        });

        let (playback, playback_rx) = PlaybackManager::new(output, config.playback_rate);
        let worker = TurnWorker {
            machine: TurnMachine::new(Duration::from_millis(config.min_capture_ms)),
            interval: Duration::from_millis(config.fragment_interval_ms),
            lang: config.voice_lang.clone(),
            device,
            transport,
            playback,
            capture: None,
            armed: None,
            posting: None,
            events: event_tx,
            status_tx,
        };
        tokio::spawn(worker.run(cmd_rx, playback_rx));

        (Self { cmd_tx, status_rx }, event_rx)
    }

    /// Mic button: begin capturing, unless a turn is already in progress.
    pub fn start(&self) {
        let _ = self.cmd_tx.send(Cmd::Start);
    }

    /// Stop button: finalize capture, deferred to the minimum capture time.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Cmd::Stop);
    }

    /// Re-issue the failed clip with a fresh cache-busting token.
    pub fn retry_audio(&self) {
        let _ = self.cmd_tx.send(Cmd::RetryAudio);
    }

    /// Play the current clip again from the start.
    pub fn replay_audio(&self) {
        let _ = self.cmd_tx.send(Cmd::ReplayAudio);
    }

    /// Change the language hint sent with subsequent voice turns.
    pub fn set_language(&self, lang: &str) {
        let _ = self.cmd_tx.send(Cmd::SetLanguage(lang.to_string()));
    }

    /// Get current status.
    pub fn status(&self) -> TurnStatus {
        self.status_rx.borrow().clone()
    }

    /// Subscribe to status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<TurnStatus> {
        self.status_rx.clone()
    }
}

// ─── Worker ────────────────────────────────────────────────────────────────

struct TurnWorker {
    machine: TurnMachine,
    interval: Duration,
    lang: String,
    device: Box<dyn CaptureDevice>,
    transport: Arc<dyn TurnTransport>,
    playback: PlaybackManager,
    /// Held only while Recording or StopArmed.
    capture: Option<CaptureStream>,
    /// The single scheduled deferred stop.
    armed: Option<Instant>,
    posting: Option<JoinHandle<Result<Value, TransportError>>>,
    events: mpsc::UnboundedSender<TurnEvent>,
    status_tx: watch::Sender<TurnStatus>,
}

impl TurnWorker {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Cmd>,
        mut playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
                fragment = next_fragment(&mut self.capture) => match fragment {
                    Some(fragment) => self.on_fragment(fragment),
                    None => warn!("turn: capture stream ended before stop"),
                },
                _ = wait_until(self.armed) => self.on_deadline(),
                result = wait_post(&mut self.posting) => self.on_response(result),
                Some(event) = playback_rx.recv() => self.on_playback(event),
            }
        }

        debug!("turn: controller shut down");
        drop(self.capture.take());
        self.playback.release();
    }

    fn on_command(&mut self, cmd: Cmd) {
        match cmd {
            Cmd::Start => self.on_start(),
            Cmd::Stop => self.on_stop(),
            Cmd::RetryAudio => {
                if self.playback.retry(now_millis()).is_none() {
                    debug!("turn: no failed clip to retry");
                }
            }
            Cmd::ReplayAudio => {
                if self.playback.replay().is_none() {
                    debug!("turn: no clip to replay");
                }
            }
            Cmd::SetLanguage(lang) => {
                debug!("turn: voice language → {lang}");
                self.lang = lang;
            }
        }
    }

    fn on_start(&mut self) {
        if !self.machine.can_start() {
            info!("turn: start ignored ({:?})", self.machine.phase());
            self.emit(TurnEvent::StartIgnored);
            return;
        }

        if let Some(clip) = self.playback.release() {
            self.emit(TurnEvent::AudioCleared { clip });
        }

        match self.device.acquire(self.interval) {
            Ok(stream) => {
                self.capture = Some(stream);
                self.armed = None;
                self.machine.recording_started(now());
                info!("turn: recording");
                self.emit(TurnEvent::RecordingStarted);
            }
            Err(e) => {
                warn!("turn: capture device unavailable: {e}");
                self.machine.acquisition_failed();
                self.emit(TurnEvent::DeviceError {
                    message: e.to_string(),
                });
            }
        }
        self.publish();
    }

    fn on_stop(&mut self) {
        match self.machine.request_stop(now()) {
            StopDecision::Ignored => debug!("turn: stop ignored ({:?})", self.machine.phase()),
            StopDecision::Armed { wait } => {
                debug!("turn: stop armed, {wait:?} until minimum capture");
                self.armed = Some(Instant::now() + wait);
                self.emit(TurnEvent::StopArmed {
                    wait_ms: wait.as_millis() as u64,
                });
                self.publish();
            }
            StopDecision::Finalize => self.finalize(),
        }
    }

    fn on_deadline(&mut self) {
        self.armed = None;
        match self.machine.deadline_reached(now()) {
            StopDecision::Ignored => {}
            StopDecision::Armed { wait } => self.armed = Some(Instant::now() + wait),
            StopDecision::Finalize => self.finalize(),
        }
    }

    fn on_fragment(&mut self, fragment: Vec<i16>) {
        let rms = compute_rms(&fragment);
        if self.machine.append_fragment(fragment) {
            self.emit(TurnEvent::Level { rms });
        }
    }

    /// Runs once per turn: the machine is already in Posting.
    fn finalize(&mut self) {
        self.armed = None;
        let trailing = self
            .capture
            .take()
            .map(CaptureStream::finish)
            .unwrap_or_default();
        let samples = self.machine.take_payload(trailing);
        let audio = encode_wav(&samples, SAMPLE_RATE);

        info!(
            "turn: posting {} ms of audio ({} bytes, lang={})",
            duration_ms(samples.len()),
            audio.len(),
            self.lang
        );
        self.emit(TurnEvent::Posting { bytes: audio.len() });
        self.publish();

        let request = VoiceTurnRequest {
            lang: self.lang.clone(),
            audio,
        };
        let transport = self.transport.clone();
        self.posting = Some(tokio::spawn(async move {
            transport.post_voice(request).await
        }));
    }

    fn on_response(&mut self, result: Result<Value, TransportError>) {
        self.posting = None;

        let ok = match result {
            Ok(raw) => {
                self.present(&raw);
                true
            }
            Err(e) => {
                warn!("turn: post failed: {e}");
                self.emit(TurnEvent::TurnFailed {
                    chip: e.chip_code(),
                });
                false
            }
        };

        self.machine.complete(ok);
        self.emit(TurnEvent::TurnFinished { ok });
        self.publish();
    }

    fn present(&mut self, raw: &Value) {
        let response = normalize(raw);

        if let Some(text) = response.stt_text.clone() {
            self.emit(TurnEvent::Transcript { text });
        }
        self.emit(TurnEvent::Answer {
            text: response.answer_text.clone(),
            breadcrumb: response.breadcrumb.clone(),
        });

        match response.media_ref.as_deref() {
            Some(media_ref) => {
                let (released, clip) = self.playback.start(media_ref, &response.answer_text);
                if let Some(old) = released {
                    self.emit(TurnEvent::AudioCleared { clip: old });
                }
                self.emit(TurnEvent::NowPlaying {
                    clip,
                    caption: Caption::NowPlaying(response.answer_text.clone()).to_string(),
                });
            }
            None => self.emit(TurnEvent::NoAudio),
        }
    }

    fn on_playback(&mut self, event: PlaybackEvent) {
        if let Some(notice) = self.playback.handle_event(event) {
            self.emit(TurnEvent::AudioUnavailable { clip: notice.clip });
            if notice.retry_added {
                self.emit(TurnEvent::RetryOffered { clip: notice.clip });
            }
        }
    }

    fn emit(&self, event: TurnEvent) {
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        let phase = self.machine.phase();
        let turns_completed = self.machine.turns_completed();
        self.status_tx.send_modify(|s| {
            s.phase = phase;
            s.busy = phase.is_busy();
            s.turns_completed = turns_completed;
        });
    }
}

/// Machine clock, on tokio's timeline so paused-time tests stay consistent.
fn now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn next_fragment(capture: &mut Option<CaptureStream>) -> Option<Vec<i16>> {
    match capture {
        Some(stream) => stream.next_fragment().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn wait_post(
    posting: &mut Option<JoinHandle<Result<Value, TransportError>>>,
) -> Result<Value, TransportError> {
    match posting {
        Some(handle) => handle
            .await
            .unwrap_or_else(|e| Err(TransportError::Network(format!("post task failed: {e}")))),
        None => std::future::pending().await,
    }
}
