//! Text turns — prefixed prompt out, answer (or raw payload) back.

use serde_json::Value;
use tracing::debug;

use voxturn_core::error::TransportError;
use voxturn_core::prompt::{script_mismatch, text_turn_request};
use voxturn_core::types::LanguageHint;

use crate::transport::TurnTransport;

/// Result of one text turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TextReply {
    /// English was selected for Arabic-script input.
    pub script_mismatch: bool,
    /// The `answer` field, or the whole payload as JSON when it is missing.
    pub answer: String,
}

/// Send a text turn. Blank input is not sent and yields `Ok(None)`.
pub async fn text_turn(
    transport: &dyn TurnTransport,
    raw: &str,
    hint: &LanguageHint,
) -> Result<Option<TextReply>, TransportError> {
    let Some(request) = text_turn_request(raw, hint) else {
        return Ok(None);
    };
    let mismatch = script_mismatch(hint, raw);
    debug!("text turn: lang={} script={}", hint.lang, hint.script);

    let data = transport.post_text(&request).await?;
    Ok(Some(TextReply {
        script_mismatch: mismatch,
        answer: answer_or_raw(&data),
    }))
}

fn answer_or_raw(data: &Value) -> String {
    data.get("answer")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| data.to_string())
}
