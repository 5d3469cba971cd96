//! Appender collecting rendered events in memory

use crate::core::{AppenderSink, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Keeps every rendered event, for inspection and tests
///
/// An optional header is recorded once, before the first event.
#[derive(Debug)]
pub struct InMemoryAppender {
    name: String,
    header: Option<String>,
    messages: Mutex<Vec<String>>,
    flushes: AtomicU64,
}

impl InMemoryAppender {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            header: None,
            messages: Mutex::new(Vec::new()),
            flushes: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    /// Rendered events, header first when one is set
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Number of stored lines, header included
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages.lock().iter().filter(|m| m.contains(needle)).count()
    }

    /// Remove and return everything stored so far
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock())
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl AppenderSink for InMemoryAppender {
    fn write(&self, rendered: &str) -> Result<()> {
        let mut messages = self.messages.lock();
        if messages.is_empty() {
            if let Some(header) = &self.header {
                messages.push(header.clone());
            }
        }
        messages.push(rendered.to_string());
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_in_order() {
        let appender = InMemoryAppender::new("memory");
        appender.write("a").unwrap();
        appender.write("b").unwrap();
        assert_eq!(appender.messages(), vec!["a", "b"]);
        assert_eq!(appender.name(), "memory");
        assert!(appender.contains("b"));
    }

    #[test]
    fn test_header_written_once() {
        let appender = InMemoryAppender::new("memory").with_header("# start");
        assert!(appender.is_empty());
        appender.write("one").unwrap();
        appender.write("two").unwrap();
        assert_eq!(appender.messages(), vec!["# start", "one", "two"]);
    }

    #[test]
    fn test_take_and_flush_count() {
        let appender = InMemoryAppender::new("memory");
        appender.write("x").unwrap();
        appender.flush().unwrap();
        assert_eq!(appender.take(), vec!["x"]);
        assert!(appender.is_empty());
        assert_eq!(appender.flush_count(), 1);
    }
}
