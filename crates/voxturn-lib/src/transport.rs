//! Turn transport — the request/response contract with the backend.
//!
//! The controller only depends on [`TurnTransport`]; [`HttpTransport`] is the
//! reqwest implementation. Responses are returned as raw JSON and left to the
//! normalizer. No timeout is applied to turn posts.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use voxturn_core::error::TransportError;
use voxturn_core::types::{ClientConfig, TextTurnRequest, VoiceTurnRequest};

/// File name of the audio part in a voice turn.
pub const AUDIO_FILE_NAME: &str = "recording.wav";

#[async_trait]
pub trait TurnTransport: Send + Sync + 'static {
    /// Post a finalized voice turn.
    async fn post_voice(&self, request: VoiceTurnRequest) -> Result<Value, TransportError>;
    /// Post a text turn.
    async fn post_text(&self, request: &TextTurnRequest) -> Result<Value, TransportError>;
    /// Fetch the server status payload.
    async fn fetch_status(&self) -> Result<Value, TransportError>;
}

/// HTTP transport: multipart voice posts, JSON text posts.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    turn_url: String,
    status_url: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            turn_url: config.turn_url(),
            status_url: config.status_url(),
        }
    }
}

#[async_trait]
impl TurnTransport for HttpTransport {
    async fn post_voice(&self, request: VoiceTurnRequest) -> Result<Value, TransportError> {
        let bytes = request.audio.len();
        let part = reqwest::multipart::Part::bytes(request.audio)
            .file_name(AUDIO_FILE_NAME)
            .mime_str("audio/wav")
            .map_err(|e| TransportError::Network(format!("mime error: {e}")))?;

        let form = reqwest::multipart::Form::new()
            .text("mode", "voice")
            .text("ui_lang", request.lang)
            .part("audio", part);

        debug!("transport: POST voice turn ({bytes} bytes) to {}", self.turn_url);
        let resp = self
            .client
            .post(&self.turn_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        read_json(resp).await
    }

    async fn post_text(&self, request: &TextTurnRequest) -> Result<Value, TransportError> {
        debug!("transport: POST text turn ({} chars)", request.text.len());
        let resp = self
            .client
            .post(&self.turn_url)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        read_json(resp).await
    }

    async fn fetch_status(&self) -> Result<Value, TransportError> {
        let resp = self
            .client
            .get(&self.status_url)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        read_json(resp).await
    }
}

async fn read_json(resp: reqwest::Response) -> Result<Value, TransportError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(TransportError::Status(status.as_u16()));
    }
    let body = resp
        .text()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;
    serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
}
