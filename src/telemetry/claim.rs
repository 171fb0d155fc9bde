//! Span helpers for claim attempts.

use tracing::Span;

use crate::model::Message;

/// Start a span for one claim/execute/commit attempt.
///
/// `message.id` stays empty until a row is claimed; see [`record_claimed`].
pub fn start_claim_span(queue: &str) -> Span {
    tracing::info_span!(
        "claim.attempt",
        "claim.queue" = queue,
        "message.id" = tracing::field::Empty,
    )
}

/// Attach the claimed message to the attempt span.
pub fn record_claimed(span: &Span, message: &Message) {
    span.record("message.id", tracing::field::display(message.id()));
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
