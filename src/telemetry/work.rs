//! Span helpers for work items, consolidation subjects and model calls.

use tracing::Span;

/// Start a span for one delivery of a work item.
///
/// The `work.status` field is declared empty and can be updated via
/// [`record_status_transition`].
pub fn start_work_span(queue: &str, item_id: &str) -> Span {
    tracing::info_span!(
        "work.process",
        "work.queue" = queue,
        "work.id" = item_id,
        "work.status" = tracing::field::Empty,
    )
}

/// Record a status transition on the span and emit an event inside it.
pub fn record_status_transition(span: &Span, from: &str, to: &str) {
    span.record("work.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_transition");
    });
}

/// Start a span for consolidating one subject.
pub fn start_subject_span(subject_id: &str, since: i64) -> Span {
    tracing::info_span!(
        "consolidation.subject",
        "subject.id" = subject_id,
        "subject.cursor" = since,
        "subject.outcome" = tracing::field::Empty,
    )
}

/// Start a span for an extraction chat call, following the GenAI
/// semantic conventions.
pub fn start_chat_span(model: &str, provider: &str) -> Span {
    tracing::info_span!(
        "gen_ai.chat",
        "gen_ai.operation.name" = "chat",
        "gen_ai.request.model" = model,
        "gen_ai.provider.name" = provider,
    )
}
