//! Object pools that keep steady-state logging allocation-free
//!
//! A [`Recycler`] hands out reusable objects (render buffers, date caches,
//! serializer scratch space). Three strategies are available:
//!
//! - [`RecyclerKind::ThreadLocal`]: each thread keeps every instance it
//!   released. No contention, but deep re-entrant logging can grow the pool.
//! - [`RecyclerKind::QueueingThreadLocal`]: each thread keeps at most
//!   `capacity` instances; extra releases are dropped.
//! - [`RecyclerKind::Dummy`]: always allocates, never retains. For
//!   environments where thread-locals are undesirable.
//!
//! `release` always resets the object with the recycler's cleaner before it
//! is pooled. Forgetting to release only costs a later allocation.

use super::thread_slot::ThreadSlot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Pooling strategy selected by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecyclerKind {
    Dummy,
    ThreadLocal,
    #[default]
    QueueingThreadLocal,
}

impl fmt::Display for RecyclerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecyclerKind::Dummy => write!(f, "Dummy"),
            RecyclerKind::ThreadLocal => write!(f, "ThreadLocal"),
            RecyclerKind::QueueingThreadLocal => write!(f, "QueueingThreadLocal"),
        }
    }
}

impl std::str::FromStr for RecyclerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dummy" => Ok(RecyclerKind::Dummy),
            "threadlocal" | "thread_local" => Ok(RecyclerKind::ThreadLocal),
            "queueingthreadlocal" | "queueing_thread_local" | "queue" => {
                Ok(RecyclerKind::QueueingThreadLocal)
            }
            _ => Err(format!("Invalid recycler kind: '{}'", s)),
        }
    }
}

/// Builds recyclers sharing one strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecyclerFactory {
    kind: RecyclerKind,
    capacity: usize,
}

impl RecyclerFactory {
    pub fn new(kind: RecyclerKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity: capacity.max(1),
        }
    }

    pub fn kind(&self) -> RecyclerKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn create<T, S, C>(&self, supplier: S, cleaner: C) -> Recycler<T>
    where
        T: Send + 'static,
        S: Fn() -> T + Send + Sync + 'static,
        C: Fn(&mut T) + Send + Sync + 'static,
    {
        Recycler::new(self.kind, self.capacity, supplier, cleaner)
    }
}

impl Default for RecyclerFactory {
    fn default() -> Self {
        Self::new(RecyclerKind::default(), 8)
    }
}

enum Storage<T: 'static> {
    Dummy,
    ThreadLocal(ThreadSlot<Vec<T>>),
    Queueing(ThreadSlot<Vec<T>>, usize),
}

/// Pool of reusable `T`
pub struct Recycler<T: 'static> {
    storage: Storage<T>,
    supplier: Arc<dyn Fn() -> T + Send + Sync>,
    cleaner: Arc<dyn Fn(&mut T) + Send + Sync>,
}

impl<T: Send + 'static> Recycler<T> {
    pub fn new<S, C>(kind: RecyclerKind, capacity: usize, supplier: S, cleaner: C) -> Self
    where
        S: Fn() -> T + Send + Sync + 'static,
        C: Fn(&mut T) + Send + Sync + 'static,
    {
        let storage = match kind {
            RecyclerKind::Dummy => Storage::Dummy,
            RecyclerKind::ThreadLocal => Storage::ThreadLocal(ThreadSlot::new(Vec::new)),
            RecyclerKind::QueueingThreadLocal => {
                Storage::Queueing(ThreadSlot::new(Vec::new), capacity.max(1))
            }
        };
        Self {
            storage,
            supplier: Arc::new(supplier),
            cleaner: Arc::new(cleaner),
        }
    }

    pub fn kind(&self) -> RecyclerKind {
        match self.storage {
            Storage::Dummy => RecyclerKind::Dummy,
            Storage::ThreadLocal(_) => RecyclerKind::ThreadLocal,
            Storage::Queueing(..) => RecyclerKind::QueueingThreadLocal,
        }
    }

    /// Take a pooled instance, or allocate when this thread's pool is empty
    pub fn acquire(&self) -> T {
        let pooled = match &self.storage {
            Storage::Dummy => None,
            Storage::ThreadLocal(slot) | Storage::Queueing(slot, _) => {
                slot.with(|pool| pool.pop()).flatten()
            }
        };
        pooled.unwrap_or_else(|| (self.supplier)())
    }

    /// Reset `value` and return it to this thread's pool
    pub fn release(&self, mut value: T) {
        (self.cleaner)(&mut value);
        match &self.storage {
            Storage::Dummy => {}
            Storage::ThreadLocal(slot) => {
                slot.with(move |pool| pool.push(value));
            }
            Storage::Queueing(slot, capacity) => {
                let capacity = *capacity;
                slot.with(move |pool| {
                    if pool.len() < capacity {
                        pool.push(value);
                    }
                });
            }
        }
    }

    /// Acquire with release on drop, including unwinding
    pub fn scoped(&self) -> Recycled<'_, T> {
        Recycled {
            value: Some(self.acquire()),
            recycler: self,
        }
    }

    /// Instances pooled for the calling thread
    pub fn pooled_on_current_thread(&self) -> usize {
        match &self.storage {
            Storage::Dummy => 0,
            Storage::ThreadLocal(slot) | Storage::Queueing(slot, _) => {
                slot.with(|pool| pool.len()).unwrap_or(0)
            }
        }
    }
}

impl<T: 'static> fmt::Debug for Recycler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.storage {
            Storage::Dummy => "Dummy",
            Storage::ThreadLocal(_) => "ThreadLocal",
            Storage::Queueing(..) => "QueueingThreadLocal",
        };
        f.debug_struct("Recycler").field("kind", &kind).finish()
    }
}

/// RAII guard returning its value to the recycler
pub struct Recycled<'a, T: Send + 'static> {
    value: Option<T>,
    recycler: &'a Recycler<T>,
}

impl<T: Send + 'static> Recycled<'_, T> {
    /// Keep the value instead of returning it to the pool
    pub fn detach(mut self) -> T {
        match self.value.take() {
            Some(value) => value,
            None => (self.recycler.supplier)(),
        }
    }
}

impl<T: Send + 'static> Deref for Recycled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
            .as_ref()
            .expect("recycled value is present until drop")
    }
}

impl<T: Send + 'static> DerefMut for Recycled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
            .as_mut()
            .expect("recycled value is present until drop")
    }
}

impl<T: Send + 'static> Drop for Recycled<'_, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.recycler.release(value);
        }
    }
}

/// Recycler for render buffers: cleared on release and shrunk back when a
/// large event grew them past `max_retained`
pub fn string_recycler(
    factory: &RecyclerFactory,
    initial_capacity: usize,
    max_retained: usize,
) -> Recycler<String> {
    factory.create(
        move || String::with_capacity(initial_capacity),
        move |buf: &mut String| {
            buf.clear();
            if buf.capacity() > max_retained {
                buf.shrink_to(max_retained);
            }
        },
    )
}

/// Byte-buffer variant of [`string_recycler`]
pub fn byte_recycler(
    factory: &RecyclerFactory,
    initial_capacity: usize,
    max_retained: usize,
) -> Recycler<Vec<u8>> {
    factory.create(
        move || Vec::with_capacity(initial_capacity),
        move |buf: &mut Vec<u8>| {
            buf.clear();
            if buf.capacity() > max_retained {
                buf.shrink_to(max_retained);
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_recycler(
        kind: RecyclerKind,
        capacity: usize,
    ) -> (Recycler<String>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let recycler = Recycler::new(
            kind,
            capacity,
            move || {
                counter.fetch_add(1, Ordering::Relaxed);
                String::with_capacity(16)
            },
            |s: &mut String| s.clear(),
        );
        (recycler, created)
    }

    #[test]
    fn test_thread_local_reuses_instance() {
        let (recycler, created) = counting_recycler(RecyclerKind::ThreadLocal, 1);

        for _ in 0..10 {
            let mut buf = recycler.acquire();
            buf.push_str("hello");
            recycler.release(buf);
        }

        assert_eq!(created.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_release_resets_state() {
        let (recycler, _) = counting_recycler(RecyclerKind::ThreadLocal, 1);
        let mut buf = recycler.acquire();
        buf.push_str("dirty");
        recycler.release(buf);

        assert!(recycler.acquire().is_empty());
    }

    #[test]
    fn test_queueing_caps_retained_instances() {
        let (recycler, created) = counting_recycler(RecyclerKind::QueueingThreadLocal, 2);

        let held: Vec<String> = (0..5).map(|_| recycler.acquire()).collect();
        assert_eq!(created.load(Ordering::Relaxed), 5);

        for buf in held {
            recycler.release(buf);
        }
        assert_eq!(recycler.pooled_on_current_thread(), 2);
    }

    #[test]
    fn test_thread_local_grows_under_recursion() {
        let (recycler, _) = counting_recycler(RecyclerKind::ThreadLocal, 1);
        let held: Vec<String> = (0..4).map(|_| recycler.acquire()).collect();
        for buf in held {
            recycler.release(buf);
        }
        assert_eq!(recycler.pooled_on_current_thread(), 4);
    }

    #[test]
    fn test_dummy_always_allocates() {
        let (recycler, created) = counting_recycler(RecyclerKind::Dummy, 8);
        for _ in 0..3 {
            let buf = recycler.acquire();
            recycler.release(buf);
        }
        assert_eq!(created.load(Ordering::Relaxed), 3);
        assert_eq!(recycler.pooled_on_current_thread(), 0);
    }

    #[test]
    fn test_scoped_releases_on_drop() {
        let (recycler, created) = counting_recycler(RecyclerKind::QueueingThreadLocal, 4);
        {
            let mut buf = recycler.scoped();
            buf.push_str("scoped");
        }
        {
            let buf = recycler.scoped();
            assert!(buf.is_empty());
        }
        assert_eq!(created.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_scoped_releases_on_panic() {
        let (recycler, _) = counting_recycler(RecyclerKind::QueueingThreadLocal, 4);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut buf = recycler.scoped();
            buf.push_str("before panic");
            panic!("converter blew up");
        }));
        assert!(result.is_err());
        assert_eq!(recycler.pooled_on_current_thread(), 1);
    }

    #[test]
    fn test_string_recycler_shrinks_large_buffers() {
        let factory = RecyclerFactory::new(RecyclerKind::ThreadLocal, 1);
        let recycler = string_recycler(&factory, 16, 64);

        let mut buf = recycler.acquire();
        buf.push_str(&"x".repeat(4096));
        recycler.release(buf);

        let buf = recycler.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() < 4096);
    }

    #[test]
    fn test_pools_are_isolated_across_threads() {
        let factory = RecyclerFactory::new(RecyclerKind::ThreadLocal, 1);
        let recycler = Arc::new(string_recycler(&factory, 16, 1024));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let recycler = Arc::clone(&recycler);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let mut buf = recycler.acquire();
                        assert!(buf.is_empty(), "acquired a buffer still in use");
                        buf.push_str(&format!("thread-{}-{}", t, i));
                        assert_eq!(buf, format!("thread-{}-{}", t, i));
                        recycler.release(buf);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_recycler_kind_parse() {
        assert_eq!("Dummy".parse::<RecyclerKind>(), Ok(RecyclerKind::Dummy));
        assert_eq!(
            "threadlocal".parse::<RecyclerKind>(),
            Ok(RecyclerKind::ThreadLocal)
        );
        assert!("pool".parse::<RecyclerKind>().is_err());
    }
}
