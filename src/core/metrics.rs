//! Pipeline metrics for observability
//!
//! Provides counters for monitoring pipeline health: admission outcomes,
//! dispatch paths, per-event failures and shutdown losses.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for pipeline observability
///
/// Every admitted event ends in exactly one of `dispatched_async`,
/// `dispatched_sync`, `discarded`, `filtered` or `dropped_on_shutdown`.
///
/// # Example
///
/// ```
/// use rust_log_pipeline::PipelineMetrics;
///
/// let metrics = PipelineMetrics::new();
///
/// metrics.record_enqueued();
/// metrics.record_dispatched_async();
/// metrics.record_discarded();
///
/// assert_eq!(metrics.enqueued(), 1);
/// assert_eq!(metrics.dispatched(), 1);
/// assert_eq!(metrics.discarded(), 1);
/// ```
#[derive(Debug)]
pub struct PipelineMetrics {
    /// Events accepted by the ring
    enqueued: AtomicU64,

    /// Events dispatched by the consumer thread
    dispatched_async: AtomicU64,

    /// Events dispatched on the calling thread
    dispatched_sync: AtomicU64,

    /// Events dropped by the queue-full policy
    discarded: AtomicU64,

    /// Number of times the ring was found full
    queue_full_events: AtomicU64,

    /// Enqueue retries performed under pressure
    retries: AtomicU64,

    /// Events rejected by level or filters
    filtered: AtomicU64,

    /// Converter failures replaced by a placeholder
    format_failures: AtomicU64,

    /// Failed or panicking sink writes
    sink_failures: AtomicU64,

    /// Events emitted after stop
    rejected_after_stop: AtomicU64,

    /// Queued events still undelivered when the shutdown timeout elapsed
    dropped_on_shutdown: AtomicU64,
}

impl PipelineMetrics {
    /// Create a new metrics instance with all counters at zero
    pub const fn new() -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            dispatched_async: AtomicU64::new(0),
            dispatched_sync: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            queue_full_events: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            format_failures: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            rejected_after_stop: AtomicU64::new(0),
            dropped_on_shutdown: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dispatched_async(&self) -> u64 {
        self.dispatched_async.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dispatched_sync(&self) -> u64 {
        self.dispatched_sync.load(Ordering::Relaxed)
    }

    /// Events dispatched on either path
    #[inline]
    pub fn dispatched(&self) -> u64 {
        self.dispatched_async() + self.dispatched_sync()
    }

    #[inline]
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn queue_full_events(&self) -> u64 {
        self.queue_full_events.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn format_failures(&self) -> u64 {
        self.format_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn rejected_after_stop(&self) -> u64 {
        self.rejected_after_stop.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dropped_on_shutdown(&self) -> u64 {
        self.dropped_on_shutdown.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_enqueued(&self) -> u64 {
        self.enqueued.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_dispatched_async(&self) -> u64 {
        self.dispatched_async.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_dispatched_sync(&self) -> u64 {
        self.dispatched_sync.fetch_add(1, Ordering::Relaxed)
    }

    /// Record a discarded event, returning the new total
    #[inline]
    pub fn record_discarded(&self) -> u64 {
        self.discarded.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn record_queue_full(&self) -> u64 {
        self.queue_full_events.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_retry(&self) -> u64 {
        self.retries.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_filtered(&self) -> u64 {
        self.filtered.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_format_failure(&self) -> u64 {
        self.format_failures.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_sink_failure(&self) -> u64 {
        self.sink_failures.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_rejected_after_stop(&self) -> u64 {
        self.rejected_after_stop.fetch_add(1, Ordering::Relaxed)
    }

    pub fn record_dropped_on_shutdown(&self, count: u64) -> u64 {
        self.dropped_on_shutdown.fetch_add(count, Ordering::Relaxed)
    }

    /// Get drop rate as a percentage (0.0 - 100.0)
    ///
    /// Counts policy discards and shutdown losses against everything that
    /// reached a terminal state. Returns 0.0 if nothing was processed.
    pub fn drop_rate(&self) -> f64 {
        let dropped = (self.discarded() + self.dropped_on_shutdown()) as f64;
        let total = self.dispatched() as f64 + dropped;
        if total == 0.0 {
            0.0
        } else {
            (dropped / total) * 100.0
        }
    }

    /// Reset all metrics to zero
    pub fn reset(&self) {
        for counter in [
            &self.enqueued,
            &self.dispatched_async,
            &self.dispatched_sync,
            &self.discarded,
            &self.queue_full_events,
            &self.retries,
            &self.filtered,
            &self.format_failures,
            &self.sink_failures,
            &self.rejected_after_stop,
            &self.dropped_on_shutdown,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for PipelineMetrics {
    /// Create a snapshot of the current metrics values
    fn clone(&self) -> Self {
        Self {
            enqueued: AtomicU64::new(self.enqueued()),
            dispatched_async: AtomicU64::new(self.dispatched_async()),
            dispatched_sync: AtomicU64::new(self.dispatched_sync()),
            discarded: AtomicU64::new(self.discarded()),
            queue_full_events: AtomicU64::new(self.queue_full_events()),
            retries: AtomicU64::new(self.retries()),
            filtered: AtomicU64::new(self.filtered()),
            format_failures: AtomicU64::new(self.format_failures()),
            sink_failures: AtomicU64::new(self.sink_failures()),
            rejected_after_stop: AtomicU64::new(self.rejected_after_stop()),
            dropped_on_shutdown: AtomicU64::new(self.dropped_on_shutdown()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.enqueued(), 0);
        assert_eq!(metrics.dispatched(), 0);
        assert_eq!(metrics.discarded(), 0);
        assert_eq!(metrics.queue_full_events(), 0);
        assert_eq!(metrics.sink_failures(), 0);
    }

    #[test]
    fn test_record_discarded_returns_total() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.record_discarded(), 1);
        assert_eq!(metrics.record_discarded(), 2);
        assert_eq!(metrics.discarded(), 2);
    }

    #[test]
    fn test_dispatched_sums_both_paths() {
        let metrics = PipelineMetrics::new();
        metrics.record_dispatched_async();
        metrics.record_dispatched_async();
        metrics.record_dispatched_sync();
        assert_eq!(metrics.dispatched(), 3);
    }

    #[test]
    fn test_metrics_drop_rate() {
        let metrics = PipelineMetrics::new();

        // Nothing processed - 0% drop rate
        assert_eq!(metrics.drop_rate(), 0.0);

        for _ in 0..100 {
            metrics.record_dispatched_async();
        }
        assert_eq!(metrics.drop_rate(), 0.0);

        // 100 dispatched, 10 dropped - ~9.09% drop rate
        for _ in 0..8 {
            metrics.record_discarded();
        }
        metrics.record_dropped_on_shutdown(2);
        let rate = metrics.drop_rate();
        assert!(rate > 9.0 && rate < 10.0, "Drop rate was {}", rate);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = PipelineMetrics::new();
        metrics.record_discarded();
        metrics.record_enqueued();
        metrics.record_queue_full();
        metrics.record_format_failure();

        metrics.reset();

        assert_eq!(metrics.discarded(), 0);
        assert_eq!(metrics.enqueued(), 0);
        assert_eq!(metrics.queue_full_events(), 0);
        assert_eq!(metrics.format_failures(), 0);
    }

    #[test]
    fn test_metrics_clone() {
        let metrics = PipelineMetrics::new();
        metrics.record_discarded();
        metrics.record_enqueued();
        metrics.record_enqueued();

        let snapshot = metrics.clone();
        assert_eq!(snapshot.discarded(), 1);
        assert_eq!(snapshot.enqueued(), 2);

        // Original and clone are independent
        metrics.record_discarded();
        assert_eq!(metrics.discarded(), 2);
        assert_eq!(snapshot.discarded(), 1);
    }
}
