//! Metric instrument factories for claimq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without one installed, every instrument is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("claimq")
}

/// Counter: enqueue calls.
/// Labels: `queue`, `result` ("ok" | "error").
pub fn messages_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("claimq.messages.enqueued")
        .with_description("Number of enqueue calls")
        .build()
}

/// Counter: claim/execute/commit attempts.
/// Labels: `queue`, `result` ("processed" | "empty" | "task_failed" | "error").
pub fn claim_attempts() -> Counter<u64> {
    meter()
        .u64_counter("claimq.claim.attempts")
        .with_description("Number of claim attempts by outcome")
        .build()
}

/// Counter: notifications delivered to subscribers.
/// Labels: `channel`.
pub fn notifications_received() -> Counter<u64> {
    meter()
        .u64_counter("claimq.notifications.received")
        .with_description("Number of LISTEN/NOTIFY events received")
        .build()
}

/// Histogram: task execution time in milliseconds, lock held throughout.
/// Labels: `queue`, `success`.
pub fn task_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("claimq.task.duration_ms")
        .with_description("Task execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
