//! Storage-safe record normalization.

use notesync_core::Record;

use crate::parser::strip_control_chars;

/// Maximum body length, in characters, kept before truncation.
pub const MAX_BODY_CHARS: usize = 100_000;

/// Appended to a body cut at [`MAX_BODY_CHARS`].
pub const TRUNCATION_MARKER: &str = "... [content truncated]";

/// Make a record safe to store.
///
/// Strips control characters from the body, then caps it at
/// [`MAX_BODY_CHARS`] characters plus [`TRUNCATION_MARKER`]. Stripping runs
/// first so that a second pass sees the same prefix and the function is a
/// fixed point. Absent values are already `""` in [`Record`].
pub fn normalize(mut record: Record) -> Record {
    let stripped = strip_control_chars(&record.body);
    record.body = cap_body(stripped);
    record
}

fn cap_body(body: String) -> String {
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((cut, _)) => {
            let mut capped = String::with_capacity(cut + TRUNCATION_MARKER.len());
            capped.push_str(&body[..cut]);
            capped.push_str(TRUNCATION_MARKER);
            capped
        }
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_body(body: String) -> Record {
        Record {
            id: "p1".into(),
            title: "t".into(),
            body,
            ..Record::default()
        }
    }

    #[test]
    fn short_body_is_unchanged() {
        let record = with_body("hello".into());
        assert_eq!(normalize(record.clone()), record);
    }

    #[test]
    fn body_at_cap_is_not_truncated() {
        let record = normalize(with_body("a".repeat(MAX_BODY_CHARS)));
        assert_eq!(record.body.chars().count(), MAX_BODY_CHARS);
        assert!(!record.body.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn long_body_is_truncated_with_marker() {
        let record = normalize(with_body("a".repeat(MAX_BODY_CHARS + 500)));
        let expected = format!("{}{TRUNCATION_MARKER}", "a".repeat(MAX_BODY_CHARS));
        assert_eq!(record.body, expected);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let record = normalize(with_body("é".repeat(MAX_BODY_CHARS + 1)));
        let kept = record.body.strip_suffix(TRUNCATION_MARKER).expect("marker");
        assert_eq!(kept.chars().count(), MAX_BODY_CHARS);
    }

    #[test]
    fn control_characters_are_removed() {
        let record = normalize(with_body("a\u{1}b\u{1b}c\nd".into()));
        assert_eq!(record.body, "abc\nd");
    }

    #[test]
    fn normalize_is_a_fixed_point() {
        let mut body = "\u{2}x".repeat(10);
        body.push_str(&"y".repeat(MAX_BODY_CHARS + 10));
        let once = normalize(with_body(body));
        let twice = normalize(once.clone());
        assert_eq!(once, twice);
        assert_eq!(
            serde_json::to_string(&once).unwrap(),
            serde_json::to_string(&twice).unwrap()
        );
    }
}
