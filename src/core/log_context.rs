//! Diagnostic context merged into every event
//!
//! This module provides:
//! - `ContextMap`: ordered, copy-on-write key/value snapshot carried by events
//! - `ThreadContext`: per-thread context owned by one pipeline
//! - `ContextGuard`: RAII guard for scoped context

use super::thread_slot::ThreadSlot;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Ordered key/value map with copy-on-write sharing
///
/// Cloning is a reference-count bump. A mutation copies the backing map only
/// when a clone (for example one captured by an in-flight event) still shares
/// it, so read-mostly threads never pay for a copy.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ContextMap {
    entries: Arc<BTreeMap<String, String>>,
}

impl ContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field to the context
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        Arc::make_mut(&mut self.entries).insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        if !self.entries.contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut self.entries).remove(key)
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries = Arc::default();
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Insert every entry of `other` whose key is not already present
    pub fn merge_missing(&mut self, other: &ContextMap) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            self.entries = Arc::clone(&other.entries);
            return;
        }
        if other.iter().all(|(k, _)| self.contains_key(k)) {
            return;
        }
        let entries = Arc::make_mut(&mut self.entries);
        for (key, value) in other.entries.iter() {
            entries
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Whether both maps share one backing allocation
    pub fn shares_storage_with(&self, other: &ContextMap) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Format fields as key=value pairs
    pub fn format_fields(&self) -> String {
        self.iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for ContextMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl fmt::Display for ContextMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_fields())
    }
}

impl Serialize for ContextMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter())
    }
}

impl<'de> Deserialize<'de> for ContextMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = BTreeMap::<String, String>::deserialize(deserializer)?;
        Ok(Self {
            entries: Arc::new(entries),
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ContextMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: Arc::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }
}

/// Per-thread diagnostic context belonging to one pipeline
///
/// Each thread sees its own map. [`ThreadContext::snapshot`] is what the
/// logger captures into an event: it shares storage with the thread's map
/// until the thread next mutates it.
///
/// # Example
///
/// ```
/// use rust_log_pipeline::core::ThreadContext;
///
/// let ctx = ThreadContext::new();
/// ctx.put("request_id", "abc-123");
///
/// let snapshot = ctx.snapshot();
/// ctx.put("user", "alice");
///
/// assert_eq!(snapshot.len(), 1);
/// assert_eq!(ctx.snapshot().len(), 2);
/// ```
#[derive(Debug)]
pub struct ThreadContext {
    slot: Arc<ThreadSlot<ContextMap>>,
}

impl ThreadContext {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(ThreadSlot::new(ContextMap::new)),
        }
    }

    /// Set a field for the calling thread
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        self.slot.with(move |map| map.insert(key, value));
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.slot
            .with(|map| map.get(key).map(str::to_string))
            .flatten()
    }

    pub fn remove(&self, key: &str) {
        self.slot.with(|map| {
            map.remove(key);
        });
    }

    pub fn clear(&self) {
        self.slot.with(ContextMap::clear);
    }

    /// Copy-on-write snapshot of the calling thread's context
    pub fn snapshot(&self) -> ContextMap {
        self.slot.with(|map| map.clone()).unwrap_or_default()
    }

    /// Set a field that is removed again when the guard drops
    pub fn scoped(&self, key: impl Into<String>, value: impl Into<String>) -> ContextGuard {
        let key = key.into();
        self.put(key.clone(), value);
        ContextGuard {
            slot: Arc::clone(&self.slot),
            key,
        }
    }
}

impl Default for ThreadContext {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for scoped context fields
///
/// Must be dropped on the thread that created it.
pub struct ContextGuard {
    slot: Arc<ThreadSlot<ContextMap>>,
    key: String,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let key = &self.key;
        self.slot.with(|map| {
            map.remove(key);
        });
    }
}
