//! Per-instance thread-local storage
//!
//! `thread_local!` statics are process-wide. Pools and diagnostic contexts
//! must instead belong to one pipeline, so each [`ThreadSlot`] takes a unique
//! id and stores its per-thread value in a single thread-local map keyed by
//! that id. Two pipelines in the same process never observe each other's
//! values.
//!
//! Dropping a slot only reaches the dropping thread's map. Every other thread
//! sweeps entries of dropped slots the next time it touches any slot after a
//! drop happened anywhere in the process.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

/// Bumped whenever a slot is dropped
static RETIRE_EPOCH: AtomicU64 = AtomicU64::new(0);

struct Entry {
    alive: Arc<AtomicBool>,
    value: Box<dyn Any>,
}

#[derive(Default)]
struct Slots {
    entries: HashMap<u64, Entry>,
    swept_epoch: u64,
}

impl Slots {
    fn sweep(&mut self) {
        let epoch = RETIRE_EPOCH.load(Ordering::Acquire);
        if epoch != self.swept_epoch {
            self.entries.retain(|_, entry| entry.alive.load(Ordering::Acquire));
            self.swept_epoch = epoch;
        }
    }
}

thread_local! {
    static SLOTS: RefCell<Slots> = RefCell::new(Slots::default());
}

/// Handle to one value per thread, initialized lazily
pub struct ThreadSlot<T: 'static> {
    id: u64,
    init: fn() -> T,
    alive: Arc<AtomicBool>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> ThreadSlot<T> {
    pub fn new(init: fn() -> T) -> Self {
        Self {
            id: NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed),
            init,
            alive: Arc::new(AtomicBool::new(true)),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run `f` with this thread's value
    ///
    /// A re-entrant call for the same slot sees a freshly initialized value.
    /// Returns `None` while the thread is being torn down.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        // Take the value out so `f` may touch other slots without a double borrow
        let mut value = SLOTS
            .try_with(|slots| {
                let mut slots = slots.try_borrow_mut().ok()?;
                slots.sweep();
                Some(match slots.entries.remove(&self.id) {
                    Some(entry) => entry.value,
                    None => Box::new((self.init)()) as Box<dyn Any>,
                })
            })
            .ok()
            .flatten()?;

        let result = value.downcast_mut::<T>().map(f);

        let _ = SLOTS.try_with(|slots| {
            if let Ok(mut slots) = slots.try_borrow_mut() {
                let alive = Arc::clone(&self.alive);
                slots.entries.insert(self.id, Entry { alive, value });
            }
        });
        result
    }

    /// Drop the calling thread's value, if any
    pub fn clear_current_thread(&self) {
        let _ = SLOTS.try_with(|slots| {
            if let Ok(mut slots) = slots.try_borrow_mut() {
                slots.entries.remove(&self.id);
            }
        });
    }
}

impl<T: 'static> Drop for ThreadSlot<T> {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        RETIRE_EPOCH.fetch_add(1, Ordering::AcqRel);
        self.clear_current_thread();
    }
}

/// Number of slot values held by the calling thread
#[cfg(test)]
pub(crate) fn values_on_current_thread() -> usize {
    SLOTS
        .try_with(|slots| slots.try_borrow().map(|s| s.entries.len()).unwrap_or(0))
        .unwrap_or(0)
}

impl<T: 'static> std::fmt::Debug for ThreadSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSlot").field("id", &self.id).finish()
    }
}
