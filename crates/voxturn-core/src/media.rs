//! Media reference helpers: artifact path rewriting and freshness tokens.

use std::sync::LazyLock;

use regex::Regex;

/// Storage prefixes the backend writes synthesized clips under.
const ARTIFACT_PREFIXES: &[&str] = &["artifacts/", "artifacts\\"];

/// Public route the backend serves artifacts from.
pub const PUBLIC_MEDIA_PREFIX: &str = "/media/";

static RE_FRESHNESS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?&]v=").unwrap());

/// Rewrite a storage path such as `artifacts/clips/x.wav` into the public
/// path `/media/clips/x.wav`. Paths outside the artifact tree yield `None`.
pub fn artifact_path_to_url(path: &str) -> Option<String> {
    let rest = ARTIFACT_PREFIXES
        .iter()
        .find_map(|prefix| path.strip_prefix(prefix))?;
    let rest = rest.replace('\\', "/");
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        return None;
    }
    Some(format!("{PUBLIC_MEDIA_PREFIX}{rest}"))
}

/// True if the URL already carries a `v=` freshness parameter.
pub fn has_freshness_token(url: &str) -> bool {
    RE_FRESHNESS.is_match(url)
}

/// Append `v=<stamp>` unless a freshness token is already present.
pub fn with_freshness_token(url: &str, stamp_ms: i64) -> String {
    if has_freshness_token(url) {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}v={stamp_ms}")
}

/// URL used by a manual retry: the query is dropped and replaced by
/// `retry=<stamp>` so the media layer cannot serve a cached failure.
pub fn retry_url(url: &str, stamp_ms: i64) -> String {
    let base = url.split('?').next().unwrap_or(url);
    format!("{base}?retry={stamp_ms}")
}

/// Current wall-clock time in milliseconds, used as a freshness stamp.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
