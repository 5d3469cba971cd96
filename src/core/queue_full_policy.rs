//! Decisions taken when the ring transport is full
//!
//! A policy never blocks by itself: it answers `Retry`, `Discard` or
//! `Synchronous` and the pipeline carries the answer out.

use super::registry::PolicyContext;
use super::log_event::EventRecord;
use super::log_level::LogLevel;
use super::status::{RateLimiter, StatusLogger};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Retries granted by the default policy before falling back
pub const DEFAULT_QUEUE_FULL_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFullAction {
    /// Try to enqueue again after a short backoff
    Retry,
    /// Drop the event and count it
    Discard,
    /// Format and dispatch on the calling thread
    Synchronous,
}

/// State of one admission attempt, passed to the policy on every full ring
#[derive(Debug, Clone, Copy)]
pub struct EnqueueAttempt {
    /// Retries already performed for this event
    pub retries: u32,
    /// When the first enqueue attempt was made
    pub started: Instant,
    /// The caller is the consumer thread itself
    pub on_consumer_thread: bool,
}

impl EnqueueAttempt {
    pub fn new(on_consumer_thread: bool) -> Self {
        Self {
            retries: 0,
            started: Instant::now(),
            on_consumer_thread,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

pub trait QueueFullPolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn on_queue_full(&self, record: &EventRecord, attempt: &EnqueueAttempt) -> QueueFullAction;

    /// Flush any aggregated diagnostics; called by the consumer when idle
    fn report_pending(&self) {}
}

/// Bounded busy-retry, then synchronous fallback
///
/// The consumer thread logging from inside an appender can never wait for
/// itself, so it always goes synchronous.
#[derive(Debug, Clone)]
pub struct DefaultQueueFullPolicy {
    max_retries: u32,
}

impl DefaultQueueFullPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl Default for DefaultQueueFullPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_FULL_RETRIES)
    }
}

impl QueueFullPolicy for DefaultQueueFullPolicy {
    fn name(&self) -> &str {
        "Default"
    }

    fn on_queue_full(&self, _record: &EventRecord, attempt: &EnqueueAttempt) -> QueueFullAction {
        if attempt.on_consumer_thread || attempt.retries >= self.max_retries {
            QueueFullAction::Synchronous
        } else {
            QueueFullAction::Retry
        }
    }
}

/// Drops events at or below a threshold level, never `ERROR` or `FATAL`
///
/// Other events are handed to the default policy. Drops are reported through
/// the status logger at most once per interval with the aggregated count.
#[derive(Debug)]
pub struct DiscardingQueueFullPolicy {
    threshold: LogLevel,
    fallback: DefaultQueueFullPolicy,
    discarded: AtomicU64,
    limiter: RateLimiter,
    status: Arc<StatusLogger>,
}

impl DiscardingQueueFullPolicy {
    pub fn new(
        threshold: LogLevel,
        fallback: DefaultQueueFullPolicy,
        report_interval: Duration,
        status: Arc<StatusLogger>,
    ) -> Self {
        Self {
            threshold,
            fallback,
            discarded: AtomicU64::new(0),
            limiter: RateLimiter::new(report_interval),
            status,
        }
    }

    pub fn threshold(&self) -> LogLevel {
        self.threshold
    }

    /// Events this policy has discarded
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn report(&self, count: u64) {
        self.status.warn(format!(
            "Ring buffer full: discarded {} events at or below {} in the last {:?}",
            count,
            self.threshold,
            self.limiter.interval()
        ));
    }
}

impl QueueFullPolicy for DiscardingQueueFullPolicy {
    fn name(&self) -> &str {
        "Discard"
    }

    fn on_queue_full(&self, record: &EventRecord, attempt: &EnqueueAttempt) -> QueueFullAction {
        if record.level <= self.threshold && !record.level.is_critical() {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            if let Some(count) = self.limiter.record() {
                self.report(count);
            }
            QueueFullAction::Discard
        } else {
            self.fallback.on_queue_full(record, attempt)
        }
    }

    fn report_pending(&self) {
        if let Some(count) = self.limiter.poll() {
            self.report(count);
        }
    }
}

/// Waits for a free slot, never drops and never formats on the caller
///
/// Only the consumer thread itself falls back to synchronous dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingQueueFullPolicy;

impl QueueFullPolicy for BlockingQueueFullPolicy {
    fn name(&self) -> &str {
        "Block"
    }

    fn on_queue_full(&self, _record: &EventRecord, attempt: &EnqueueAttempt) -> QueueFullAction {
        if attempt.on_consumer_thread {
            QueueFullAction::Synchronous
        } else {
            QueueFullAction::Retry
        }
    }
}

/// Constructor for the built-in default policy
pub fn default_policy(ctx: &PolicyContext<'_>) -> Arc<dyn QueueFullPolicy> {
    Arc::new(DefaultQueueFullPolicy::new(ctx.settings.queue_full_retries))
}

/// Constructor for the built-in discarding policy
pub fn discarding_policy(ctx: &PolicyContext<'_>) -> Arc<dyn QueueFullPolicy> {
    Arc::new(DiscardingQueueFullPolicy::new(
        ctx.settings.discard_threshold,
        DefaultQueueFullPolicy::new(ctx.settings.queue_full_retries),
        ctx.settings.discard_report_interval,
        Arc::clone(ctx.status),
    ))
}

/// Constructor for the built-in blocking policy
pub fn blocking_policy(_ctx: &PolicyContext<'_>) -> Arc<dyn QueueFullPolicy> {
    Arc::new(BlockingQueueFullPolicy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(level: LogLevel) -> EventRecord {
        EventRecord::new("test", level, "m")
    }

    fn attempt(retries: u32) -> EnqueueAttempt {
        EnqueueAttempt {
            retries,
            ..EnqueueAttempt::new(false)
        }
    }

    fn discarding(threshold: LogLevel) -> (DiscardingQueueFullPolicy, Arc<StatusLogger>) {
        let status = Arc::new(StatusLogger::new(LogLevel::Debug));
        let policy = DiscardingQueueFullPolicy::new(
            threshold,
            DefaultQueueFullPolicy::default(),
            Duration::from_secs(3600),
            Arc::clone(&status),
        );
        (policy, status)
    }

    #[test]
    fn test_default_retries_then_synchronous() {
        let policy = DefaultQueueFullPolicy::new(3);
        let record = event(LogLevel::Info);
        for retries in 0..3 {
            assert_eq!(policy.on_queue_full(&record, &attempt(retries)), QueueFullAction::Retry);
        }
        assert_eq!(policy.on_queue_full(&record, &attempt(3)), QueueFullAction::Synchronous);
    }

    #[test]
    fn test_default_on_consumer_thread() {
        let policy = DefaultQueueFullPolicy::new(3);
        let on_consumer = EnqueueAttempt::new(true);
        assert_eq!(
            policy.on_queue_full(&event(LogLevel::Info), &on_consumer),
            QueueFullAction::Synchronous
        );
    }

    #[test]
    fn test_discard_respects_threshold() {
        let (policy, _) = discarding(LogLevel::Info);
        for level in [LogLevel::Trace, LogLevel::Debug, LogLevel::Info] {
            assert_eq!(policy.on_queue_full(&event(level), &attempt(0)), QueueFullAction::Discard);
        }
        assert_eq!(
            policy.on_queue_full(&event(LogLevel::Warn), &attempt(0)),
            QueueFullAction::Retry
        );
        assert_eq!(policy.discarded(), 3);
    }

    #[test]
    fn test_discard_never_drops_critical() {
        let (policy, _) = discarding(LogLevel::Fatal);
        assert_eq!(
            policy.on_queue_full(&event(LogLevel::Warn), &attempt(0)),
            QueueFullAction::Discard
        );
        assert_eq!(
            policy.on_queue_full(&event(LogLevel::Error), &attempt(0)),
            QueueFullAction::Retry
        );
        assert_eq!(
            policy.on_queue_full(&event(LogLevel::Fatal), &attempt(5)),
            QueueFullAction::Synchronous
        );
    }

    #[test]
    fn test_discard_report_is_rate_limited() {
        let (policy, status) = discarding(LogLevel::Info);
        for _ in 0..50 {
            policy.on_queue_full(&event(LogLevel::Debug), &attempt(0));
        }
        let reports = status.entries_containing("discarded");
        assert_eq!(reports.len(), 1);
        assert!(reports[0].message.contains("discarded 1 events"));
    }

    #[test]
    fn test_blocking_retries_forever() {
        let policy = BlockingQueueFullPolicy;
        assert_eq!(
            policy.on_queue_full(&event(LogLevel::Debug), &attempt(1_000)),
            QueueFullAction::Retry
        );
        assert_eq!(
            policy.on_queue_full(&event(LogLevel::Debug), &EnqueueAttempt::new(true)),
            QueueFullAction::Synchronous
        );
    }
}
