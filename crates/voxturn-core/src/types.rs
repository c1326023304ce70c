//! Shared types for the voxturn client.
//!
//! These types are used by voxturn-lib and voxturn-cli. Keeping them in
//! voxturn-core means consumers can depend on them without pulling in
//! tokio, cpal, rodio, or reqwest.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── Presentation constants ────────────────────────────────────────────────

/// Shown in place of an empty canonical answer.
pub const NO_TEXT: &str = "(no text)";

/// Shown when a turn completes without a playable media reference.
pub const NO_AUDIO_NOTE: &str = "(no audio returned; text shown)";

/// Caption that replaces "Now Playing" after a playback error.
pub const AUDIO_UNAVAILABLE: &str = "(audio unavailable; text shown)";

/// Currency marker used in the breadcrumb cost field.
pub const CURRENCY_MARKER: &str = "₨";

// ─── Configuration ─────────────────────────────────────────────────────────

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend base URL, also used to resolve relative media references.
    pub server_url: String,
    pub turn_path: String,
    pub status_path: String,
    /// Stop requests earlier than this after capture start are deferred.
    pub min_capture_ms: u64,
    /// Capture is cut into fragments of this length.
    pub fragment_interval_ms: u64,
    /// Playback speed factor, deliberately below 1.0.
    pub playback_rate: f32,
    /// Language hint sent with voice turns.
    pub voice_lang: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            turn_path: "/api/web/turn".into(),
            status_path: "/api/status".into(),
            min_capture_ms: 1_200,
            fragment_interval_ms: 250,
            playback_rate: 0.92,
            voice_lang: "en".into(),
        }
    }
}

impl ClientConfig {
    pub fn turn_url(&self) -> String {
        join_url(&self.server_url, &self.turn_path)
    }

    pub fn status_url(&self) -> String {
        join_url(&self.server_url, &self.status_path)
    }

    /// Make a media reference fetchable. Absolute URLs pass through.
    pub fn absolute_media_url(&self, media_ref: &str) -> String {
        if media_ref.starts_with("http://") || media_ref.starts_with("https://") {
            media_ref.to_string()
        } else {
            join_url(&self.server_url, media_ref)
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

// ─── Requests ──────────────────────────────────────────────────────────────

/// Language and script selection, e.g. `en`/`roman` or `ur`/`arabic`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageHint {
    pub lang: String,
    pub script: String,
}

impl Default for LanguageHint {
    fn default() -> Self {
        Self {
            lang: "en".into(),
            script: "roman".into(),
        }
    }
}

/// A finalized voice turn: language hint plus one WAV payload.
#[derive(Debug, Clone)]
pub struct VoiceTurnRequest {
    pub lang: String,
    pub audio: Vec<u8>,
}

/// JSON body of a text turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextTurnRequest {
    pub text: String,
    pub mode: String,
    pub ui_lang: String,
    pub ui_script: String,
    pub ui_auto: bool,
}

// ─── Turn state ────────────────────────────────────────────────────────────

/// Phase of the current voice turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Idle,
    Recording,
    StopArmed,
    Posting,
    Done,
    Failed,
}

impl TurnPhase {
    /// True while a post or its response processing is unresolved.
    pub fn is_busy(self) -> bool {
        self == TurnPhase::Posting
    }

    /// True while the capture device is held.
    pub fn is_capturing(self) -> bool {
        matches!(self, TurnPhase::Recording | TurnPhase::StopArmed)
    }

    /// Done and Failed fall back to Idle implicitly: a new turn may start.
    pub fn accepts_start(self) -> bool {
        matches!(self, TurnPhase::Idle | TurnPhase::Done | TurnPhase::Failed)
    }
}

/// Turn status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TurnStatus {
    pub phase: TurnPhase,
    pub busy: bool,
    pub turns_completed: u64,
}

// ─── Normalized response ───────────────────────────────────────────────────

/// Compact status line for a completed turn. Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breadcrumb {
    pub route: Option<String>,
    pub elapsed_seconds: Option<f64>,
    pub cost_amount: Option<f64>,
}

impl Breadcrumb {
    /// Elapsed seconds with one decimal place, e.g. `2.5`.
    pub fn elapsed_display(&self) -> Option<String> {
        self.elapsed_seconds.map(|s| format!("{s:.1}"))
    }

    /// Cost with two decimal places and the currency marker, e.g. `₨12.30`.
    pub fn cost_display(&self) -> Option<String> {
        self.cost_amount
            .map(|c| format!("{CURRENCY_MARKER}{c:.2}"))
    }

    pub fn is_empty(&self) -> bool {
        self.route.is_none() && self.elapsed_seconds.is_none() && self.cost_amount.is_none()
    }
}

impl fmt::Display for Breadcrumb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bits = Vec::with_capacity(3);
        if let Some(route) = &self.route {
            bits.push(format!("route={route}"));
        }
        if let Some(secs) = self.elapsed_display() {
            bits.push(format!("t={secs}s"));
        }
        if let Some(cost) = self.cost_display() {
            bits.push(format!("cost={cost}"));
        }
        f.write_str(&bits.join(" • "))
    }
}

/// Canonical view of a loosely typed turn response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedResponse {
    /// Always present; empty when no answer field was found.
    pub answer_text: String,
    pub stt_text: Option<String>,
    pub breadcrumb: Option<Breadcrumb>,
    /// Playable URL, carrying a freshness token.
    pub media_ref: Option<String>,
}

impl NormalizedResponse {
    /// Answer as shown on screen; an empty answer degrades to [`NO_TEXT`].
    pub fn display_answer(&self) -> &str {
        if self.answer_text.is_empty() {
            NO_TEXT
        } else {
            &self.answer_text
        }
    }
}

// ─── Playback ──────────────────────────────────────────────────────────────

/// Identifier of one playback handle. Never reused within a process.
pub type ClipId = u64;

/// Caption attached to the active clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Caption {
    NowPlaying(String),
    Unavailable,
}

impl fmt::Display for Caption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caption::NowPlaying(answer) if answer.is_empty() => f.write_str("Now Playing — …"),
            Caption::NowPlaying(answer) => write!(f, "Now Playing — {answer}"),
            Caption::Unavailable => f.write_str(AUDIO_UNAVAILABLE),
        }
    }
}

// ─── Turn events ───────────────────────────────────────────────────────────

/// Events emitted by the voice turn controller for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    RecordingStarted,
    /// Start refused because the previous turn is still in flight.
    StartIgnored,
    /// Capture device could not be acquired; the turn stays idle.
    DeviceError { message: String },
    /// RMS level (0.0–1.0) of the latest capture fragment.
    Level { rms: f32 },
    /// An early stop was deferred until the minimum capture deadline.
    StopArmed { wait_ms: u64 },
    /// Capture finalized and the turn is being posted.
    Posting { bytes: usize },
    Transcript { text: String },
    Answer {
        text: String,
        breadcrumb: Option<Breadcrumb>,
    },
    NoAudio,
    /// The previous clip was paused, rewound, and removed.
    AudioCleared { clip: ClipId },
    NowPlaying { clip: ClipId, caption: String },
    AudioUnavailable { clip: ClipId },
    /// A manual retry control is now available for the clip.
    RetryOffered { clip: ClipId },
    TurnFailed { chip: String },
    /// The busy flag was released; the next turn may start.
    TurnFinished { ok: bool },
}
