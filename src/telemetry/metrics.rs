//! Metric instrument factories for syncqueue.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"syncqueue"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for syncqueue instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("syncqueue")
}

/// Counter: queue-level operations.
/// Labels: `operation` ("append" | "get" | "get_empty" | "peek" | "size" | "iterate" | "purge").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("syncqueue.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: empty polls a blocking dequeue slept through.
pub fn poll_retries() -> Counter<u64> {
    meter()
        .u64_counter("syncqueue.queue.poll_retries")
        .with_description("Backoff sleeps taken by blocking dequeues")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("syncqueue.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
