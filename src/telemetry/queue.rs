//! Queue operation span helpers.

use std::path::Path;

use tracing::Span;

/// Start a span for a queue operation against the database at `path`.
///
/// `queue.entry_id` and `queue.retries` are declared empty and filled in
/// by [`record_dequeue`].
pub fn start_queue_span(operation: &str, path: &Path) -> Span {
    tracing::debug_span!(
        "queue.op",
        "queue.operation" = operation,
        "queue.path" = %path.display(),
        "queue.entry_id" = tracing::field::Empty,
        "queue.retries" = tracing::field::Empty,
    )
}

/// Record the outcome of a dequeue on its span.
pub fn record_dequeue(span: &Span, entry_id: Option<i64>, retries: u32) {
    if let Some(id) = entry_id {
        span.record("queue.entry_id", id);
    }
    span.record("queue.retries", retries);
    span.in_scope(|| match entry_id {
        Some(id) => tracing::debug!(id, retries, "dequeued entry"),
        None => tracing::trace!(retries, "queue empty"),
    });
}
