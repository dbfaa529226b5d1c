//! Retention Metrics
//!
//! Thread-safe counters for deletions, size checks and expiration bookkeeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::engine::DeletionCause;

/// Thread-safe metrics for tracking retention operations
#[derive(Debug, Clone)]
pub struct RetentionMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    size_checks: AtomicUsize,
    files_evicted: AtomicUsize,
    files_expired: AtomicUsize,
    bytes_reclaimed: AtomicU64,
    delete_failures: AtomicUsize,
    already_absent: AtomicUsize,
    policy_exhausted: AtomicUsize,
    expirations_scheduled: AtomicUsize,
    schedule_failures: AtomicUsize,
    /// Size observed by the most recent size check
    last_observed_bytes: AtomicU64,
}

impl Default for RetentionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RetentionMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    /// Record a completed size check and the size it ended at
    pub fn record_size_check(&self, observed_bytes: u64) {
        self.inner.size_checks.fetch_add(1, Ordering::Relaxed);
        self.inner
            .last_observed_bytes
            .store(observed_bytes, Ordering::Relaxed);
    }

    /// Record a file removed from disk
    pub fn record_deleted(&self, cause: DeletionCause, size_bytes: u64) {
        match cause {
            DeletionCause::Eviction => self.inner.files_evicted.fetch_add(1, Ordering::Relaxed),
            DeletionCause::Expiration => self.inner.files_expired.fetch_add(1, Ordering::Relaxed),
        };
        self.inner
            .bytes_reclaimed
            .fetch_add(size_bytes, Ordering::Relaxed);
    }

    pub fn record_delete_failure(&self) {
        self.inner.delete_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a deletion whose target was already gone
    pub fn record_already_absent(&self) {
        self.inner.already_absent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_policy_exhausted(&self) {
        self.inner.policy_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiration_scheduled(&self) {
        self.inner
            .expirations_scheduled
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_schedule_failure(&self) {
        self.inner.schedule_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn size_checks(&self) -> usize {
        self.inner.size_checks.load(Ordering::Relaxed)
    }

    pub fn files_evicted(&self) -> usize {
        self.inner.files_evicted.load(Ordering::Relaxed)
    }

    pub fn files_expired(&self) -> usize {
        self.inner.files_expired.load(Ordering::Relaxed)
    }

    pub fn bytes_reclaimed(&self) -> u64 {
        self.inner.bytes_reclaimed.load(Ordering::Relaxed)
    }

    pub fn delete_failures(&self) -> usize {
        self.inner.delete_failures.load(Ordering::Relaxed)
    }

    pub fn already_absent(&self) -> usize {
        self.inner.already_absent.load(Ordering::Relaxed)
    }

    pub fn policy_exhausted(&self) -> usize {
        self.inner.policy_exhausted.load(Ordering::Relaxed)
    }

    pub fn expirations_scheduled(&self) -> usize {
        self.inner.expirations_scheduled.load(Ordering::Relaxed)
    }

    pub fn schedule_failures(&self) -> usize {
        self.inner.schedule_failures.load(Ordering::Relaxed)
    }

    pub fn last_observed_bytes(&self) -> u64 {
        self.inner.last_observed_bytes.load(Ordering::Relaxed)
    }

    /// Get a summary of all metrics
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            size_checks: self.size_checks(),
            files_evicted: self.files_evicted(),
            files_expired: self.files_expired(),
            bytes_reclaimed: self.bytes_reclaimed(),
            delete_failures: self.delete_failures(),
            already_absent: self.already_absent(),
            policy_exhausted: self.policy_exhausted(),
            expirations_scheduled: self.expirations_scheduled(),
            schedule_failures: self.schedule_failures(),
            last_observed_bytes: self.last_observed_bytes(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub size_checks: usize,
    pub files_evicted: usize,
    pub files_expired: usize,
    pub bytes_reclaimed: u64,
    pub delete_failures: usize,
    pub already_absent: usize,
    pub policy_exhausted: usize,
    pub expirations_scheduled: usize,
    pub schedule_failures: usize,
    pub last_observed_bytes: u64,
}

impl MetricsSummary {
    fn format_mb(bytes: u64) -> String {
        format!("{:.2}", bytes as f64 / (1024.0 * 1024.0))
    }

    /// Log the metrics summary
    pub fn log(&self) {
        tracing::info!("=== Retention Metrics Summary ===");
        tracing::info!(
            "Size checks: {} (last observed {} MB)",
            self.size_checks,
            Self::format_mb(self.last_observed_bytes)
        );
        tracing::info!(
            "Deleted: {} evicted, {} expired, {} MB reclaimed",
            self.files_evicted,
            self.files_expired,
            Self::format_mb(self.bytes_reclaimed)
        );
        tracing::info!(
            "Races and failures: {} already absent, {} failed deletes, {} ceiling unachievable",
            self.already_absent,
            self.delete_failures,
            self.policy_exhausted
        );
        tracing::info!(
            "Expirations: {} scheduled, {} scheduling failures",
            self.expirations_scheduled,
            self.schedule_failures
        );
    }
}
