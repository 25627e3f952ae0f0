//! Counters kept since the runtime was built.
//!
//! Nothing is exported anywhere; hosts read [`ProcessingMetrics::stats`]
//! and report it however they like.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Running totals of work handed to the integration.
#[derive(Debug, Default)]
pub struct ProcessingMetrics {
    processed_time_groups: AtomicUsize,
    processed_tags: AtomicUsize,
}

impl ProcessingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one time group the integration recorded successfully.
    pub fn record_time_group(&self) {
        self.processed_time_groups.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts tags pushed upstream by a sync hook.
    pub fn record_tags(&self, count: usize) {
        self.processed_tags.fetch_add(count, Ordering::Relaxed);
    }

    pub fn stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed_tags: self.processed_tags.load(Ordering::Relaxed),
            processed_time_groups: self.processed_time_groups.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ProcessingMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub processed_tags: usize,
    pub processed_time_groups: usize,
}
