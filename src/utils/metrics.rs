//! OTel-native metrics instruments.
//!
//! Centralized metric definitions using OpenTelemetry meters.
//! All instruments are lazily initialized and feature-gated behind `otel`.
//!
//! Naming follows OTel semantic conventions (dot-separated).
//! The OTel Collector / Prometheus exporter converts dots to underscores.

use std::sync::LazyLock;

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("dbrelay"));

// ============================================================================
// Consumer
// ============================================================================

/// Total records delivered to the consumer.
pub static MESSAGES_RECEIVED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("dbrelay.consumer.received.total")
        .with_description("Total records delivered to the mutation consumer")
        .build()
});

/// Total records resolved without error (applied or skipped).
pub static MESSAGES_PROCESSED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("dbrelay.consumer.processed.total")
        .with_description("Total records applied or skipped as duplicates")
        .build()
});

/// Total records routed to the dead-letter topic.
pub static MESSAGES_ERROR_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("dbrelay.consumer.error.total")
        .with_description("Total records dead-lettered")
        .build()
});

/// Duration of per-record processing.
pub static PROCESS_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("dbrelay.consumer.process.duration")
        .with_description("Mutation processing duration")
        .with_unit("s")
        .build()
});

// ============================================================================
// Attribute helpers
// ============================================================================

/// Build a topic attribute.
pub fn topic_attr(topic: &str) -> KeyValue {
    KeyValue::new("topic", topic.to_string())
}

/// Build an outcome attribute.
pub fn outcome_attr(outcome: &'static str) -> KeyValue {
    KeyValue::new("outcome", outcome)
}
