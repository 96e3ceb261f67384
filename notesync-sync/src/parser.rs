//! Parser for the source's delimited text output.
//!
//! One window's output looks like this (stdout and stderr combined):
//!
//! ```text
//! BATCH_START
//! ------- Note 51 -------
//! Title: Groceries
//! ID: x-coredata://…/ICNote/p51
//! Body: <div>milk</div>
//! <div>eggs</div>
//! Date Created: 2024-01-02 09:15:00
//! Date Updated: 2024-03-04 18:00:12
//! ----------------
//! ------- Note 52 -------
//! …
//! BATCH_END
//! ```
//!
//! Field lines appear in that fixed order, each optional. A body runs until
//! the next field line that may follow it. The footer is the last line that
//! consists of the footer dashes alone; bodies may contain dashes anywhere
//! else. Blocks without a footer are dropped whole.

use std::sync::LazyLock;

use regex::Regex;

use notesync_core::{timestamp, Record, UNTITLED};

/// Line that closes a note block.
pub const BLOCK_FOOTER: &str = "----------------";

/// Prefix the source gives ids it failed to read.
pub const UNKNOWN_ID_PREFIX: &str = "unknown-id-";

static BLOCK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"------- Note \d+ -------").expect("block header pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Id,
    Body,
    Created,
    Updated,
}

/// Field labels in the order the source writes them.
const FIELDS: [(Field, &str); 5] = [
    (Field::Title, "Title:"),
    (Field::Id, "ID:"),
    (Field::Body, "Body:"),
    (Field::Created, "Date Created:"),
    (Field::Updated, "Date Updated:"),
];

#[derive(Debug, Default)]
struct RawBlock<'a> {
    title: Option<&'a str>,
    id: Option<&'a str>,
    body: Option<Vec<&'a str>>,
    created: Option<&'a str>,
    updated: Option<&'a str>,
}

/// Parse one window's output into records.
///
/// Never fails: incomplete blocks, blocks without a usable id, and
/// unparseable dates degrade to skipped blocks or defaulted fields.
pub fn parse_notes(output: &str) -> Vec<Record> {
    let synced_at = timestamp::now_iso();
    let mut records = Vec::new();
    let mut incomplete = 0usize;
    let mut discarded = 0usize;

    // The first piece is whatever preceded the first header.
    for block in BLOCK_HEADER.split(output).skip(1) {
        let Some(end) = footer_offset(block) else {
            incomplete += 1;
            continue;
        };
        match build_record(scan_block(&block[..end]), &synced_at) {
            Some(record) => records.push(record),
            None => discarded += 1,
        }
    }

    if incomplete > 0 || discarded > 0 {
        tracing::debug!(
            "parsed {} note(s); skipped {incomplete} incomplete and {discarded} id-less block(s)",
            records.len()
        );
    }
    records
}

/// Byte offset of the last footer line in `block`.
fn footer_offset(block: &str) -> Option<usize> {
    let mut offset = 0usize;
    let mut found = None;
    for line in block.split_inclusive('\n') {
        if line.trim() == BLOCK_FOOTER {
            found = Some(offset);
        }
        offset += line.len();
    }
    found
}

fn scan_block(block: &str) -> RawBlock<'_> {
    let mut raw = RawBlock::default();
    let mut next_field = 0usize;
    let mut in_body = false;

    for line in block.lines() {
        if let Some((index, value)) = match_field(line, next_field) {
            in_body = false;
            next_field = index + 1;
            match FIELDS[index].0 {
                Field::Title => raw.title = Some(value.trim()),
                Field::Id => raw.id = Some(value.trim()),
                Field::Body => {
                    raw.body = Some(vec![value]);
                    in_body = true;
                }
                Field::Created => raw.created = Some(value.trim()),
                Field::Updated => raw.updated = Some(value.trim()),
            }
        } else if in_body {
            if let Some(lines) = raw.body.as_mut() {
                lines.push(line);
            }
        }
    }
    raw
}

/// Find a field label at the start of `line`, considering only fields at or
/// after `from` in source order.
fn match_field(line: &str, from: usize) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    FIELDS
        .iter()
        .enumerate()
        .skip(from)
        .find_map(|(index, (_, label))| trimmed.strip_prefix(label).map(|rest| (index, rest)))
}

fn build_record(raw: RawBlock<'_>, now: &str) -> Option<Record> {
    let id = raw.id.filter(|id| !id.is_empty())?;
    if id.starts_with(UNKNOWN_ID_PREFIX) {
        return None;
    }

    let body = raw
        .body
        .map(|lines| strip_control_chars(lines.join("\n").trim()))
        .unwrap_or_default();

    Some(Record {
        title: raw.title.unwrap_or(UNTITLED).to_string(),
        id: id.to_string(),
        body,
        created_at: date_or_now(raw.created, now),
        updated_at: date_or_now(raw.updated, now),
        synced_at: now.to_string(),
    })
}

fn date_or_now(raw: Option<&str>, now: &str) -> String {
    match raw {
        Some(value) => timestamp::source_to_iso(value).unwrap_or_else(|| {
            if value != timestamp::UNKNOWN {
                tracing::warn!("unrecognised note date '{value}', using current time");
            }
            now.to_string()
        }),
        None => now.to_string(),
    }
}

/// Remove ASCII control characters other than tab, newline and carriage return.
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_ascii_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
