//! Self-diagnostics for the pipeline
//!
//! The status channel is always synchronous and never goes through the ring,
//! so reporting a failure can never re-enter a full queue.

use super::log_level::LogLevel;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Number of status entries kept for inspection by default
pub const DEFAULT_STATUS_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub level: LogLevel,
    pub message: String,
    pub time: SystemTime,
}

impl fmt::Display for StatusEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[PIPELINE {}] {}", self.level, self.message)
    }
}

/// Receiver of status entries
pub trait StatusListener: Send + Sync {
    fn on_status(&self, entry: &StatusEntry);
}

/// Writes status entries to stderr
#[derive(Debug, Clone, Copy)]
pub struct StderrStatusListener {
    use_colors: bool,
}

impl StderrStatusListener {
    pub fn new() -> Self {
        Self { use_colors: false }
    }

    pub fn with_colors(use_colors: bool) -> Self {
        Self { use_colors }
    }
}

impl Default for StderrStatusListener {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusListener for StderrStatusListener {
    #[cfg(feature = "console")]
    fn on_status(&self, entry: &StatusEntry) {
        use colored::Colorize;
        if self.use_colors {
            let prefix = format!("[PIPELINE {}]", entry.level).color(entry.level.color_code());
            eprintln!("{} {}", prefix, entry.message);
        } else {
            eprintln!("{}", entry);
        }
    }

    #[cfg(not(feature = "console"))]
    fn on_status(&self, entry: &StatusEntry) {
        let _ = self.use_colors;
        eprintln!("{}", entry);
    }
}

/// Synchronous diagnostic channel owned by one pipeline
pub struct StatusLogger {
    level: RwLock<LogLevel>,
    listeners: RwLock<Vec<Arc<dyn StatusListener>>>,
    retained: Mutex<VecDeque<StatusEntry>>,
    capacity: usize,
    reported_once: Mutex<HashSet<String>>,
}

impl StatusLogger {
    /// Status logger that only retains entries
    pub fn new(level: LogLevel) -> Self {
        Self {
            level: RwLock::new(level),
            listeners: RwLock::new(Vec::new()),
            retained: Mutex::new(VecDeque::new()),
            capacity: DEFAULT_STATUS_CAPACITY,
            reported_once: Mutex::new(HashSet::new()),
        }
    }

    /// Status logger writing to stderr
    pub fn with_stderr(level: LogLevel) -> Self {
        let status = Self::new(level);
        status.add_listener(Arc::new(StderrStatusListener::default()));
        status
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn StatusListener>) {
        self.listeners.write().push(listener);
    }

    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
    }

    pub fn level(&self) -> LogLevel {
        *self.level.read()
    }

    pub fn set_level(&self, level: LogLevel) {
        *self.level.write() = level;
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        level >= self.level()
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        if !self.is_enabled(level) {
            return;
        }
        let entry = StatusEntry {
            level,
            message: message.into(),
            time: SystemTime::now(),
        };

        for listener in self.listeners.read().iter() {
            listener.on_status(&entry);
        }

        let mut retained = self.retained.lock();
        if retained.len() == self.capacity {
            retained.pop_front();
        }
        retained.push_back(entry);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Report under `key` only the first time; returns whether it was reported
    pub fn warn_once(&self, key: &str, message: impl FnOnce() -> String) -> bool {
        self.log_once(LogLevel::Warn, key, message)
    }

    pub fn error_once(&self, key: &str, message: impl FnOnce() -> String) -> bool {
        self.log_once(LogLevel::Error, key, message)
    }

    fn log_once(&self, level: LogLevel, key: &str, message: impl FnOnce() -> String) -> bool {
        {
            let mut reported = self.reported_once.lock();
            if reported.contains(key) {
                return false;
            }
            reported.insert(key.to_string());
        }
        self.log(level, message());
        true
    }

    /// Snapshot of retained entries, oldest first
    pub fn entries(&self) -> Vec<StatusEntry> {
        self.retained.lock().iter().cloned().collect()
    }

    /// Retained entries whose message contains `needle`
    pub fn entries_containing(&self, needle: &str) -> Vec<StatusEntry> {
        self.retained
            .lock()
            .iter()
            .filter(|e| e.message.contains(needle))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.retained.lock().clear();
        self.reported_once.lock().clear();
    }
}

impl Default for StatusLogger {
    fn default() -> Self {
        Self::with_stderr(LogLevel::Warn)
    }
}

impl fmt::Debug for StatusLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusLogger")
            .field("level", &self.level())
            .field("listeners", &self.listeners.read().len())
            .field("retained", &self.retained.lock().len())
            .finish()
    }
}

/// At most one report per interval, carrying the count accumulated since
/// the previous report
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_report: Mutex<Option<std::time::Instant>>,
    pending: AtomicU64,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_report: Mutex::new(None),
            pending: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Count one occurrence; returns the aggregate when a report is due
    pub fn record(&self) -> Option<u64> {
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.poll()
    }

    /// Aggregate count if the window has elapsed and something is pending
    pub fn poll(&self) -> Option<u64> {
        let mut last = self.last_report.try_lock()?;
        let now = std::time::Instant::now();
        let due = match *last {
            None => true,
            Some(at) => now.duration_since(at) >= self.interval,
        };
        if !due {
            return None;
        }
        let count = self.pending.swap(0, Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        *last = Some(now);
        Some(count)
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collect(Mutex<Vec<String>>);

    impl StatusListener for Collect {
        fn on_status(&self, entry: &StatusEntry) {
            self.0.lock().push(entry.to_string());
        }
    }

    #[test]
    fn test_level_threshold() {
        let status = StatusLogger::new(LogLevel::Warn);
        status.info("ignored");
        status.warn("kept");
        status.error("kept too");

        let entries = status.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "kept");
    }

    #[test]
    fn test_listener_receives_prefixed_lines() {
        let status = StatusLogger::new(LogLevel::Debug);
        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        status.add_listener(collect.clone());

        status.warn("sink failed");
        assert_eq!(collect.0.lock().as_slice(), ["[PIPELINE WARN] sink failed"]);
    }

    #[test]
    fn test_retention_is_bounded() {
        let status = StatusLogger::new(LogLevel::Debug).with_capacity(3);
        for i in 0..5 {
            status.warn(format!("entry {}", i));
        }
        let messages: Vec<String> = status.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["entry 2", "entry 3", "entry 4"]);
    }

    #[test]
    fn test_warn_once() {
        let status = StatusLogger::new(LogLevel::Debug);
        assert!(status.warn_once("converter:date", || "date failed".to_string()));
        assert!(!status.warn_once("converter:date", || "date failed".to_string()));
        assert!(status.warn_once("converter:level", || "level failed".to_string()));
        assert_eq!(status.entries().len(), 2);
    }

    #[test]
    fn test_rate_limiter_aggregates() {
        let limiter = RateLimiter::new(Duration::from_secs(3600));
        assert_eq!(limiter.record(), Some(1));
        assert_eq!(limiter.record(), None);
        assert_eq!(limiter.record(), None);
        assert_eq!(limiter.pending(), 2);
    }

    #[test]
    fn test_rate_limiter_reports_after_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(10));
        assert_eq!(limiter.record(), Some(1));
        limiter.record();
        limiter.record();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(limiter.poll(), Some(2));
        assert_eq!(limiter.poll(), None);
    }
}
