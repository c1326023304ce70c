//! Error taxonomy for voice and text turns.
//!
//! A missing response field is not an error: the normalizer degrades the
//! affected output and never fails.

use thiserror::Error;

/// Capture device unavailable, permission denied, or already held.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no microphone found; please connect an audio input device")]
    NoDevice,

    #[error("failed to query input config: {0}")]
    Config(String),

    #[error("failed to build input stream: {0}")]
    StreamBuild(String),

    #[error("failed to start input stream: {0}")]
    StreamStart(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("capture device is already in use")]
    Busy,
}

/// Network failure or non-success status while posting a turn.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Network(String),

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl TransportError {
    /// Short code rendered in the error chip (`HTTP_502`, `network`).
    pub fn chip_code(&self) -> String {
        match self {
            TransportError::Status(code) => format!("HTTP_{code}"),
            TransportError::Network(_) | TransportError::Decode(_) => "network".to_string(),
        }
    }
}

/// Media failed to load or decode. Recovered locally by the playback manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("failed to fetch media: {0}")]
    Fetch(String),

    #[error("failed to decode media: {0}")]
    Decode(String),

    #[error("audio output unavailable: {0}")]
    Output(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chip_code_for_status() {
        assert_eq!(TransportError::Status(503).chip_code(), "HTTP_503");
    }

    #[test]
    fn chip_code_for_network_and_decode() {
        assert_eq!(TransportError::Network("refused".into()).chip_code(), "network");
        assert_eq!(TransportError::Decode("eof".into()).chip_code(), "network");
    }
}
