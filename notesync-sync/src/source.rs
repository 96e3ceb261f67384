//! The external note source.
//!
//! The sync engine only needs two things from the source: how many notes
//! exist, and the delimited text dump of a 1-based inclusive window of them.
//! [`OsascriptSource`] gets both from the Notes app via AppleScript; tests
//! substitute their own [`NoteSource`].

use std::process::Command;

use crate::error::SourceError;

/// Logged by the window script before the first note.
pub const BATCH_START: &str = "BATCH_START";
/// Logged by the window script after the last note.
pub const BATCH_END: &str = "BATCH_END";

const COUNT_SCRIPT: &str = r#"tell application "Notes" to return count of every note"#;

/// Where notes come from.
pub trait NoteSource {
    /// Total number of notes available right now.
    fn note_count(&self) -> Result<usize, SourceError>;

    /// Raw output for notes `start..=end` (1-based). Notes past the end of
    /// the collection are simply absent from the output.
    fn fetch_window(&self, start: usize, end: usize) -> Result<String, SourceError>;
}

/// Runs AppleScript through `osascript` (or a compatible program).
#[derive(Debug, Clone)]
pub struct OsascriptSource {
    command: String,
}

impl OsascriptSource {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn run(&self, script: &str) -> Result<(String, String), SourceError> {
        let output = Command::new(&self.command)
            .arg("-e")
            .arg(script)
            .output()
            .map_err(|source| SourceError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(SourceError::Exit {
                command: self.command.clone(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok((stdout, stderr))
    }
}

impl NoteSource for OsascriptSource {
    fn note_count(&self) -> Result<usize, SourceError> {
        let (stdout, _) = self.run(COUNT_SCRIPT)?;
        let trimmed = stdout.trim();
        trimmed.parse().map_err(|_| SourceError::BadCount {
            output: trimmed.to_string(),
        })
    }

    fn fetch_window(&self, start: usize, end: usize) -> Result<String, SourceError> {
        let (stdout, stderr) = self.run(&window_script(start, end))?;
        // `log` writes to stderr, the script's return value to stdout.
        Ok(format!("{stdout}\n{stderr}"))
    }
}

/// AppleScript that logs notes `start..=end` in the block format read by
/// [`crate::parser::parse_notes`].
pub fn window_script(start: usize, end: usize) -> String {
    format!(
        r#"
on formatDate(theDate)
    set y to year of theDate
    set m to month of theDate as integer
    set d to day of theDate
    set h to hours of theDate
    set mi to minutes of theDate
    set s to seconds of theDate as integer
    if m < 10 then set m to "0" & m
    if d < 10 then set d to "0" & d
    if h < 10 then set h to "0" & h
    if mi < 10 then set mi to "0" & mi
    if s < 10 then set s to "0" & s
    return (y as string) & "-" & m & "-" & d & " " & h & ":" & mi & ":" & s
end formatDate

tell application "Notes"
    set allNotes to every note
    log "{BATCH_START}"
    repeat with i from {start} to {end}
        if i <= (count of allNotes) then
            set theNote to item i of allNotes
            log "------- Note " & i & " -------"
            try
                log "Title: " & name of theNote
            on error
                log "Title: [Untitled]"
            end try
            try
                log "ID: " & id of theNote
            on error
                log "ID: unknown-id-" & i
            end try
            try
                log "Body: " & body of theNote
            on error
                log "Body: [No content]"
            end try
            try
                log "Date Created: " & my formatDate(creation date of theNote)
            on error
                log "Date Created: unknown"
            end try
            try
                log "Date Updated: " & my formatDate(modification date of theNote)
            on error
                log "Date Updated: unknown"
            end try
            log "----------------"
        end if
    end repeat
    log "{BATCH_END}"
    return "Processed notes {start} to {end}"
end tell
"#
    )
}
