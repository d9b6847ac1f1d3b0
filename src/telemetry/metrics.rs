//! Metric instrument factories for lanework.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"lanework"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for lanework instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("lanework")
}

/// Counter: broker operations (connect, declare, publish, consume, deliver,
/// ack, nack).
/// Labels: `queue` or `routing_key`, `operation`.
pub fn broker_operations() -> Counter<u64> {
    meter()
        .u64_counter("lanework.broker.operations")
        .with_description("Number of broker operations")
        .build()
}

/// Counter: work item status transitions.
/// Labels: `from`, `to`.
pub fn work_status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("lanework.work.status_transitions")
        .with_description("Number of work item status transitions")
        .build()
}

/// Counter: deliveries dropped without processing (duplicate, unknown id, bad body).
/// Labels: `reason`.
pub fn work_ignored() -> Counter<u64> {
    meter()
        .u64_counter("lanework.work.ignored")
        .with_description("Deliveries that did not run the pipeline")
        .build()
}

/// Counter: pending items republished by the rescan job.
pub fn work_republished() -> Counter<u64> {
    meter()
        .u64_counter("lanework.work.republished")
        .with_description("Pending work items republished by rescan")
        .build()
}

/// Counter: distributed lock operations.
/// Labels: `key`, `result` ("acquired" | "busy" | "timeout" | "released" | "stale").
pub fn lock_operations() -> Counter<u64> {
    meter()
        .u64_counter("lanework.lock.operations")
        .with_description("Number of distributed lock operations")
        .build()
}

/// Counter: TTL cache lookups.
/// Labels: `cache`, `result` ("hit" | "miss").
pub fn cache_lookups() -> Counter<u64> {
    meter()
        .u64_counter("lanework.cache.lookups")
        .with_description("TTL cache lookups")
        .build()
}

/// Counter: route table refreshes.
/// Labels: `result` ("ok" | "error").
pub fn route_refreshes() -> Counter<u64> {
    meter()
        .u64_counter("lanework.router.refreshes")
        .with_description("Service registry polls")
        .build()
}

/// Counter: consolidation outcomes per subject.
/// Labels: `outcome` ("updated" | "unchanged" | "failed").
pub fn consolidation_subjects() -> Counter<u64> {
    meter()
        .u64_counter("lanework.consolidation.subjects")
        .with_description("Subjects processed by consolidation")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("lanework.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
