//! Structured output from a language model.
//!
//! Accepted shapes, surrounding whitespace ignored:
//!
//! ```text
//! response := json
//!           | prose? "```" tag? json "```" prose?
//! tag      := [A-Za-z0-9]+          (e.g. "json")
//! ```
//!
//! An opening fence counts only at the start of a line, and a closing fence
//! only at the start or end of a line, so backticks inside JSON strings are
//! left alone. Only the first fenced block is read. Anything that fails this
//! grammar is a [`ParseError`], never a silent empty value.

use crate::error::ParseError;
use serde::de::DeserializeOwned;

const FENCE: &str = "```";

pub fn parse_fenced_json<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    let body = unfence(raw)?;
    serde_json::from_str(body).map_err(ParseError::Malformed)
}

fn unfence(raw: &str) -> Result<&str, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    let Some(open) = trimmed
        .match_indices(FENCE)
        .map(|(i, _)| i)
        .find(|&i| starts_line(trimmed, i))
    else {
        return Ok(trimmed);
    };

    let after_open = &trimmed[open + FENCE.len()..];
    let tag_len = after_open
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after_open.len());
    let inner = &after_open[tag_len..];
    let close = inner
        .match_indices(FENCE)
        .map(|(i, _)| i)
        .find(|&i| starts_line(inner, i) || ends_line(inner, i + FENCE.len()))
        .ok_or(ParseError::UnterminatedFence)?;

    let body = inner[..close].trim();
    if body.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(body)
}

/// Only spaces or tabs between the previous newline (or start) and `at`.
fn starts_line(s: &str, at: usize) -> bool {
    let line_start = s[..at].rfind('\n').map_or(0, |n| n + 1);
    s[line_start..at].chars().all(|c| c == ' ' || c == '\t')
}

/// Only whitespace between `at` and the next newline (or end).
fn ends_line(s: &str, at: usize) -> bool {
    let rest = &s[at..];
    let line_end = rest.find('\n').unwrap_or(rest.len());
    rest[..line_end].trim().is_empty()
}
