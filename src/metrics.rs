//! Process-wide consumer counters.
//!
//! Counters start at zero, are only incremented by the mutation consumer and
//! reset on restart. The status server reads them through [`MetricsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[cfg(feature = "otel")]
use crate::utils::metrics::{
    MESSAGES_ERROR_TOTAL, MESSAGES_PROCESSED_TOTAL, MESSAGES_RECEIVED_TOTAL,
};

/// Received/processed/error counters shared between the consumer and the
/// status server.
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    received: AtomicU64,
    processed: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time view of [`ConsumerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub errors: u64,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record was delivered to the consumer.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "otel")]
        MESSAGES_RECEIVED_TOTAL.add(1, &[]);
    }

    /// A record resolved without error (applied or skipped).
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "otel")]
        MESSAGES_PROCESSED_TOTAL.add(1, &[]);
    }

    /// A record was dead-lettered.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "otel")]
        MESSAGES_ERROR_TOTAL.add(1, &[]);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
