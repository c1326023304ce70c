//! Text-turn preparation: instruction prefixes and language selection.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{LanguageHint, TextTurnRequest};

static RE_ARABIC_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x{0600}-\x{06FF}]").unwrap());

/// Note shown when English is selected but the input is in Arabic script.
pub const SCRIPT_MISMATCH_NOTE: &str = "Note: You’re set to English. I’ll reply in English.";

/// Instruction prepended to text turns so the answer comes back in the
/// selected language and script. Unknown combinations get no prefix.
pub fn instruction_prefix(lang: &str, script: &str) -> &'static str {
    match (lang, script) {
        ("en", _) => "Please answer strictly in English.\n\n",
        ("ur", "roman") => "Meharbani se jawab Roman Urdu mein likhein.\n\n",
        ("ur", "arabic") => "براہ کرم جواب اردو رسم الخط میں دیں۔\n\n",
        _ => "",
    }
}

/// Parse a `lang:script` selector such as `ur:arabic`.
///
/// Missing parts default to `en` and `roman`.
pub fn parse_combo(value: &str) -> LanguageHint {
    let value = if value.is_empty() { "en:roman" } else { value };
    let mut parts = value.splitn(2, ':');
    let lang = parts.next().filter(|s| !s.is_empty()).unwrap_or("en");
    let script = parts.next().filter(|s| !s.is_empty()).unwrap_or("roman");
    LanguageHint {
        lang: lang.to_string(),
        script: script.to_string(),
    }
}

/// True when English is selected but the text contains Arabic-script characters.
pub fn script_mismatch(hint: &LanguageHint, text: &str) -> bool {
    hint.lang == "en" && RE_ARABIC_SCRIPT.is_match(text)
}

/// Build a text-turn body. Returns `None` for blank input.
pub fn text_turn_request(raw: &str, hint: &LanguageHint) -> Option<TextTurnRequest> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Some(TextTurnRequest {
        text: format!("{}{raw}", instruction_prefix(&hint.lang, &hint.script)),
        mode: "text".to_string(),
        ui_lang: hint.lang.clone(),
        ui_script: hint.script.clone(),
        ui_auto: false,
    })
}
