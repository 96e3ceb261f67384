//! Timestamp formatting.
//!
//! The source reports dates as `YYYY-MM-DD HH:MM:SS` wall-clock values with no
//! zone. They are rewritten as ISO-8601 with a `Z` marker without shifting the
//! clock value, which keeps `updated_date` byte-stable across runs.

use chrono::{NaiveDateTime, SecondsFormat, Utc};

/// Format the source emits for note dates.
pub const SOURCE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Literal the source emits when a date could not be read.
pub const UNKNOWN: &str = "unknown";

/// Current time as ISO-8601 with microseconds and a `Z` suffix.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Convert a source date to ISO-8601, or `None` if it is `unknown` or does
/// not match [`SOURCE_FORMAT`].
pub fn source_to_iso(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw == UNKNOWN {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, SOURCE_FORMAT)
        .ok()
        .map(|dt| format!("{}Z", dt.format("%Y-%m-%dT%H:%M:%S")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn converts_source_format() {
        assert_eq!(
            source_to_iso("2024-03-09 07:05:01").as_deref(),
            Some("2024-03-09T07:05:01Z")
        );
    }

    #[rstest]
    #[case("unknown")]
    #[case("")]
    #[case("2024-13-40 99:00:00")]
    #[case("Tuesday, 9 March 2024")]
    fn rejects_unconvertible(#[case] raw: &str) {
        assert_eq!(source_to_iso(raw), None);
    }

    #[test]
    fn now_iso_has_utc_marker() {
        let now = now_iso();
        assert!(now.ends_with('Z'), "got {now}");
        assert!(chrono::DateTime::parse_from_rfc3339(&now).is_ok());
    }
}
