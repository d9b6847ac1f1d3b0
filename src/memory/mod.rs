//! Subject knowledge: merging extracted facts and presenting facts and
//! evidence to the extractor.

pub mod merge;
pub mod parse;

pub use merge::{MergeOutcome, merge_facts};
pub use parse::parse_fenced_json;

use crate::model::memory::{EventRecord, Evidence, Fact};
use std::fmt::Write;

/// Longest event text shown to the extractor, in characters.
const MAX_EVENT_CHARS: usize = 500;

/// Numbered fact list, or a placeholder when there are none.
pub fn render_facts(facts: &[Fact]) -> String {
    if facts.is_empty() {
        return "(no existing facts)".to_string();
    }
    let mut out = String::new();
    for (i, fact) in facts.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. [{}] {} (confidence {:.2})",
            i + 1,
            fact.category,
            fact.content,
            fact.confidence
        );
    }
    out
}

/// Each event as a block: reply target, preceding context, the event
/// itself marked with `>>`, following context.
pub fn render_evidence(subject_id: &str, evidence: &[Evidence]) -> String {
    let mut out = String::new();
    for (i, item) in evidence.iter().enumerate() {
        let _ = writeln!(out, "--- event {} (chat {}) ---", i + 1, item.chat_id);
        if let Some(reply) = &item.reply_to {
            let _ = writeln!(out, "   replying to: {}", render_event(subject_id, reply));
        }
        for event in &item.before {
            let _ = writeln!(out, "   {}", render_event(subject_id, event));
        }
        let _ = writeln!(out, ">> {}", render_event(subject_id, &item.event));
        for event in &item.after {
            let _ = writeln!(out, "   {}", render_event(subject_id, event));
        }
    }
    out
}

fn render_event(subject_id: &str, event: &EventRecord) -> String {
    let speaker = if event.role == "assistant" {
        "assistant".to_string()
    } else if event.user_id == subject_id {
        "subject".to_string()
    } else {
        format!("user {}", short_id(&event.user_id))
    };
    format!("{speaker}: {}", truncate(&event.text, MAX_EVENT_CHARS))
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}…", &text[..end]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, user: &str, role: &str, text: &str) -> EventRecord {
        EventRecord {
            message_id: id.into(),
            user_id: user.into(),
            role: role.into(),
            text: text.into(),
            create_time: 0,
        }
    }

    #[test]
    fn empty_facts_placeholder() {
        assert_eq!(render_facts(&[]), "(no existing facts)");
        let rendered = render_facts(&[Fact::new("pet", "has a cat", 0.8)]);
        assert_eq!(rendered, "1. [pet] has a cat (confidence 0.80)\n");
    }

    #[test]
    fn evidence_marks_subject_event() {
        let evidence = vec![Evidence {
            chat_id: "c1".into(),
            event: event("m2", "u1", "user", "I adopted a cat"),
            before: vec![event("m1", "someone-else-entirely", "user", "any news?")],
            after: vec![event("m3", "bot", "assistant", "congrats")],
            reply_to: None,
        }];
        let rendered = render_evidence("u1", &evidence);
        assert!(rendered.contains(">> subject: I adopted a cat"));
        assert!(rendered.contains("   user someone-: any news?"));
        assert!(rendered.contains("   assistant: congrats"));
    }

    #[test]
    fn long_text_is_truncated_on_char_boundary() {
        let text = "é".repeat(MAX_EVENT_CHARS + 10);
        let out = truncate(&text, MAX_EVENT_CHARS);
        assert_eq!(out.chars().count(), MAX_EVENT_CHARS + 1);
    }
}
