//! Server status ribbon: `server_time=<local time> • server_id=<id>`.

use chrono::{DateTime, Local};
use serde_json::Value;

const TIME_FIELDS: &[&str] = &["time_utc", "time", "now"];
const ID_FIELDS: &[&str] = &["server_id", "instance_id", "node_id"];

/// Ribbon shown when the status endpoint is unreachable or unparsable.
pub const RIBBON_UNAVAILABLE: &str = "server_time=n/a";

fn first_str<'a>(raw: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|f| raw.get(*f).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

/// Format an RFC 3339 timestamp as local `YYYY-MM-DD HH:MM`.
pub fn format_local(iso: &str) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(iso).ok()?;
    Some(parsed.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
}

/// Render the ribbon from a status payload.
pub fn ribbon(raw: &Value) -> String {
    let local = first_str(raw, TIME_FIELDS)
        .and_then(format_local)
        .unwrap_or_else(|| "n/a".to_string());
    match first_str(raw, ID_FIELDS) {
        Some(id) => format!("server_time={local} • server_id={id}"),
        None => format!("server_time={local}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_fields() {
        assert_eq!(ribbon(&json!({})), RIBBON_UNAVAILABLE);
    }

    #[test]
    fn id_without_time() {
        assert_eq!(
            ribbon(&json!({"instance_id": "node-7"})),
            "server_time=n/a • server_id=node-7"
        );
    }

    #[test]
    fn time_is_localized() {
        let iso = "2025-03-01T10:15:00Z";
        let expected = format_local(iso).unwrap();
        assert_eq!(expected.len(), "2025-03-01 10:15".len());
        assert_eq!(
            ribbon(&json!({"time": iso, "server_id": "a1"})),
            format!("server_time={expected} • server_id=a1")
        );
    }

    #[test]
    fn unparsable_time() {
        assert_eq!(ribbon(&json!({"time_utc": "yesterday"})), RIBBON_UNAVAILABLE);
    }
}
