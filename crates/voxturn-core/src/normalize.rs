//! Response normalization — resolve a loosely typed turn response into one
//! canonical answer, an optional breadcrumb, and a playable media reference.
//!
//! Every output is resolved from a small table of field paths evaluated
//! first-match-wins. Adding a fallback field is a table edit. A missing field
//! is an expected outcome, never an error.
//!
//! "First match" means the first path whose value is present and non-null.
//! The selected value is then type-checked; a present value of the wrong
//! type yields absence instead of falling through to the next path.

use serde_json::Value;

use crate::media::{artifact_path_to_url, now_millis, with_freshness_token};
use crate::types::{Breadcrumb, NormalizedResponse};

/// A path of object keys into the raw payload.
type FieldPath = &'static [&'static str];

const ANSWER_FIELDS: &[FieldPath] = &[
    &["answer_tts"],
    &["tts_text"],
    &["answer"],
    &["text"],
    &["answer_for_tts"],
];

const STT_FIELDS: &[FieldPath] = &[&["stt_text"]];

const ROUTE_FIELDS: &[FieldPath] = &[&["route"]];

/// Milliseconds.
const ELAPSED_FIELDS: &[FieldPath] = &[
    &["timings", "total_ms"],
    &["metrics", "total_ms"],
    &["latency_ms"],
];

const COST_FIELDS: &[FieldPath] = &[
    &["cost_pkr"],
    &["cost_pk"],
    &["usage", "cost_pkr"],
    &["usage", "cost_pk"],
];

/// Ready-to-use URL.
const MEDIA_URL_FIELDS: &[FieldPath] = &[&["tts_url"]];

/// Storage path under the artifact tree.
const MEDIA_PATH_FIELDS: &[FieldPath] = &[&["tts_path"]];

/// Normalize a raw response, stamping the media reference with the current time.
pub fn normalize(raw: &Value) -> NormalizedResponse {
    normalize_at(raw, now_millis())
}

/// Normalize with an explicit freshness stamp.
pub fn normalize_at(raw: &Value, stamp_ms: i64) -> NormalizedResponse {
    NormalizedResponse {
        answer_text: resolve_answer(raw),
        stt_text: first_present(raw, STT_FIELDS).and_then(non_empty_str),
        breadcrumb: resolve_breadcrumb(raw),
        media_ref: resolve_media_ref(raw, stamp_ms),
    }
}

/// Walk a field path. Non-object intermediate values end the walk.
fn lookup<'a>(raw: &'a Value, path: FieldPath) -> Option<&'a Value> {
    let mut current = raw;
    for key in path {
        current = current.as_object()?.get(*key)?;
    }
    Some(current)
}

/// First value in the table that is present and not null.
fn first_present<'a>(raw: &'a Value, table: &[FieldPath]) -> Option<&'a Value> {
    table
        .iter()
        .filter_map(|path| lookup(raw, *path))
        .find(|v| !v.is_null())
}

fn non_empty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn finite_number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|n| n.is_finite())
}

fn resolve_answer(raw: &Value) -> String {
    match first_present(raw, ANSWER_FIELDS) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn resolve_route(raw: &Value) -> Option<String> {
    match first_present(raw, ROUTE_FIELDS)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

fn resolve_breadcrumb(raw: &Value) -> Option<Breadcrumb> {
    let breadcrumb = Breadcrumb {
        route: resolve_route(raw),
        elapsed_seconds: first_present(raw, ELAPSED_FIELDS)
            .and_then(finite_number)
            .map(|ms| ms.max(0.0) / 1000.0),
        cost_amount: first_present(raw, COST_FIELDS).and_then(finite_number),
    };
    (!breadcrumb.is_empty()).then_some(breadcrumb)
}

fn resolve_media_ref(raw: &Value, stamp_ms: i64) -> Option<String> {
    let url = first_present(raw, MEDIA_URL_FIELDS)
        .and_then(non_empty_str)
        .or_else(|| {
            first_present(raw, MEDIA_PATH_FIELDS)
                .and_then(Value::as_str)
                .and_then(artifact_path_to_url)
        })?;
    Some(with_freshness_token(&url, stamp_ms))
}
