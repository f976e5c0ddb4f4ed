//! Line splitting: raw input (uploaded file content or pasted text) into log lines.

use serde::{Deserialize, Serialize};

/// One line of user-supplied log input.
///
/// Created by [`split_lines`] and never mutated afterwards. Content is kept
/// exactly as it appeared in the input, including surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogLine(String);

impl LogLine {
    pub fn new(line: impl Into<String>) -> Self {
        LogLine(line.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogLine {
    fn from(line: &str) -> Self {
        LogLine(line.to_string())
    }
}

impl From<String> for LogLine {
    fn from(line: String) -> Self {
        LogLine(line)
    }
}

impl std::ops::Deref for LogLine {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for LogLine {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for LogLine {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for LogLine {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Split raw input into its non-blank lines, in input order.
///
/// Lines end at `\n` or `\r\n` only; a lone `\r` (or any other Unicode line
/// separator) stays inside the line. Lines that are empty after trimming are
/// skipped; every other line is kept untrimmed.
pub fn split_lines(raw: &str) -> Vec<LogLine> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(LogLine::from)
        .collect()
}
