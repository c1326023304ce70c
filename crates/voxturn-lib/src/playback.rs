//! Clip playback — one audio clip at a time, with manual retry on failure.
//!
//! [`PlaybackManager`] owns the single playback handle. Starting a clip
//! always stops, rewinds, and removes the previous one first; callers cannot
//! hold two. Errors stay local: the caption switches to the "audio
//! unavailable" notice and a retry control is offered once per clip.
//!
//! [`AudioOutput`] is the media layer seam. [`RodioOutput`] fetches the clip
//! over HTTP and plays it on a dedicated OS thread (rodio `OutputStream` is
//! !Send). Outcomes come back asynchronously as [`PlaybackEvent`]s.

use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use rodio::{Decoder, OutputStream, Sink};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use voxturn_core::error::PlaybackError;
use voxturn_core::media::retry_url;
use voxturn_core::types::{Caption, ClientConfig, ClipId};

/// Outcome of loading a clip, reported by the media layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started { clip: ClipId },
    Failed { clip: ClipId, error: PlaybackError },
}

pub type PlaybackEvents = mpsc::UnboundedSender<PlaybackEvent>;

/// Media layer. Implementations must report each load on `events`.
pub trait AudioOutput: Send + 'static {
    /// Load `url` and start playing it at `rate`, replacing nothing: the
    /// manager has already stopped any previous clip.
    fn load(&mut self, clip: ClipId, url: &str, rate: f32, events: PlaybackEvents);
    /// Pause the clip, rewind it, and drop it.
    fn stop(&mut self, clip: ClipId);
}

/// The single live playback handle.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveClip {
    pub id: ClipId,
    pub url: String,
    pub caption: Caption,
    /// Set when the retry control has been shown for this clip.
    pub retry_offered: bool,
}

/// Reported when the active clip fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureNotice {
    pub clip: ClipId,
    /// True only for the failure that first added the retry control.
    pub retry_added: bool,
}

pub struct PlaybackManager {
    output: Box<dyn AudioOutput>,
    events_tx: PlaybackEvents,
    active: Option<ActiveClip>,
    next_id: ClipId,
    rate: f32,
}

impl PlaybackManager {
    /// Create a manager. Media layer outcomes arrive on the returned receiver
    /// and must be fed back through [`handle_event`](Self::handle_event).
    pub fn new(
        output: Box<dyn AudioOutput>,
        rate: f32,
    ) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            output,
            events_tx,
            active: None,
            next_id: 1,
            rate,
        };
        (manager, events_rx)
    }

    pub fn active(&self) -> Option<&ActiveClip> {
        self.active.as_ref()
    }

    /// Stop and remove the active clip, if any. Returns its id.
    pub fn release(&mut self) -> Option<ClipId> {
        let clip = self.active.take()?;
        self.output.stop(clip.id);
        debug!("playback: released clip {}", clip.id);
        Some(clip.id)
    }

    /// Start playing `media_ref` captioned with the answer text.
    ///
    /// Returns the released previous clip (if any) and the new clip id.
    pub fn start(&mut self, media_ref: &str, answer: &str) -> (Option<ClipId>, ClipId) {
        let released = self.release();

        let id = self.next_id;
        self.next_id += 1;
        self.active = Some(ActiveClip {
            id,
            url: media_ref.to_string(),
            caption: Caption::NowPlaying(answer.to_string()),
            retry_offered: false,
        });

        info!("playback: clip {id} ← {media_ref} (rate {})", self.rate);
        self.output
            .load(id, media_ref, self.rate, self.events_tx.clone());
        (released, id)
    }

    /// Apply a media layer outcome. Events for released clips are ignored.
    pub fn handle_event(&mut self, event: PlaybackEvent) -> Option<FailureNotice> {
        match event {
            PlaybackEvent::Started { clip } => {
                debug!("playback: clip {clip} playing");
                None
            }
            PlaybackEvent::Failed { clip, error } => {
                let active = self.active.as_mut().filter(|a| a.id == clip)?;
                warn!("playback: clip {clip} failed: {error}");
                active.caption = Caption::Unavailable;
                let retry_added = !active.retry_offered;
                active.retry_offered = true;
                Some(FailureNotice { clip, retry_added })
            }
        }
    }

    /// Re-issue the failed clip with a fresh `retry=` token. Only available
    /// once the retry control has been offered.
    pub fn retry(&mut self, stamp_ms: i64) -> Option<ClipId> {
        let active = self.active.as_mut().filter(|a| a.retry_offered)?;
        active.url = retry_url(&active.url, stamp_ms);
        info!("playback: retry clip {} ← {}", active.id, active.url);
        self.output.stop(active.id);
        self.output
            .load(active.id, &active.url, self.rate, self.events_tx.clone());
        Some(active.id)
    }

    /// Play the active clip again from the start.
    pub fn replay(&mut self) -> Option<ClipId> {
        let active = self.active.as_ref()?;
        self.output.stop(active.id);
        self.output
            .load(active.id, &active.url, self.rate, self.events_tx.clone());
        Some(active.id)
    }
}

// ─── rodio output ──────────────────────────────────────────────────────────

enum PlayCmd {
    Play {
        clip: ClipId,
        bytes: Vec<u8>,
        rate: f32,
        events: PlaybackEvents,
    },
    Stop {
        clip: ClipId,
    },
}

/// Fetches clips over HTTP and plays them through the default output device.
pub struct RodioOutput {
    client: reqwest::Client,
    config: ClientConfig,
    /// Clip currently wanted; fetches for any other clip are discarded.
    current: Arc<AtomicU64>,
    play_tx: std::sync::mpsc::Sender<PlayCmd>,
}

impl RodioOutput {
    pub fn new(config: ClientConfig) -> Self {
        let current = Arc::new(AtomicU64::new(0));
        let (play_tx, play_rx) = std::sync::mpsc::channel::<PlayCmd>();
        let thread_current = current.clone();
        std::thread::Builder::new()
            .name("voxturn-playback".into())
            .spawn(move || playback_thread(play_rx, thread_current))
            .expect("failed to spawn playback thread");

        Self {
            client: reqwest::Client::new(),
            config,
            current,
            play_tx,
        }
    }
}

impl AudioOutput for RodioOutput {
    fn load(&mut self, clip: ClipId, url: &str, rate: f32, events: PlaybackEvents) {
        self.current.store(clip, Ordering::SeqCst);
        let url = self.config.absolute_media_url(url);
        let client = self.client.clone();
        let current = self.current.clone();
        let play_tx = self.play_tx.clone();

        tokio::spawn(async move {
            let bytes = match fetch_clip(&client, &url).await {
                Ok(bytes) => bytes,
                Err(error) => {
                    let _ = events.send(PlaybackEvent::Failed { clip, error });
                    return;
                }
            };
            if current.load(Ordering::SeqCst) != clip {
                debug!("playback: clip {clip} superseded during fetch");
                return;
            }
            let _ = play_tx.send(PlayCmd::Play {
                clip,
                bytes,
                rate,
                events,
            });
        });
    }

    fn stop(&mut self, clip: ClipId) {
        let _ = self
            .current
            .compare_exchange(clip, 0, Ordering::SeqCst, Ordering::SeqCst);
        let _ = self.play_tx.send(PlayCmd::Stop { clip });
    }
}

async fn fetch_clip(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, PlaybackError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| PlaybackError::Fetch(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(PlaybackError::Fetch(format!("HTTP {}", resp.status())));
    }

    let mut bytes = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| PlaybackError::Fetch(e.to_string()))?;
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

// ─── Playback OS thread ───────────────────────────────────────────────────

fn playback_thread(cmd_rx: std::sync::mpsc::Receiver<PlayCmd>, current: Arc<AtomicU64>) {
    let output = match OutputStream::try_default() {
        Ok(pair) => Some(pair),
        Err(e) => {
            error!("playback: failed to open audio output: {e}");
            None
        }
    };

    let mut playing: Option<(ClipId, Sink)> = None;

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            PlayCmd::Play {
                clip,
                bytes,
                rate,
                events,
            } => {
                if current.load(Ordering::SeqCst) != clip {
                    continue;
                }
                if let Some((_, sink)) = playing.take() {
                    sink.stop();
                }
                match start_sink(output.as_ref().map(|(_, handle)| handle), bytes, rate) {
                    Ok(sink) => {
                        playing = Some((clip, sink));
                        let _ = events.send(PlaybackEvent::Started { clip });
                    }
                    Err(error) => {
                        let _ = events.send(PlaybackEvent::Failed { clip, error });
                    }
                }
            }
            PlayCmd::Stop { clip } => {
                if playing.as_ref().is_some_and(|(id, _)| *id == clip) {
                    if let Some((_, sink)) = playing.take() {
                        sink.pause();
                        sink.stop();
                    }
                }
            }
        }
    }

    if let Some((_, sink)) = playing.take() {
        sink.stop();
    }
}

fn start_sink(
    handle: Option<&rodio::OutputStreamHandle>,
    bytes: Vec<u8>,
    rate: f32,
) -> Result<Sink, PlaybackError> {
    let handle = handle.ok_or_else(|| PlaybackError::Output("no output device".into()))?;
    let source =
        Decoder::new(Cursor::new(bytes)).map_err(|e| PlaybackError::Decode(e.to_string()))?;
    let sink = Sink::try_new(handle).map_err(|e| PlaybackError::Output(e.to_string()))?;
    sink.set_speed(rate);
    sink.append(source);
    sink.play();
    Ok(sink)
}
