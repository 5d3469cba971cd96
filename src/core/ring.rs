//! Bounded multi-producer ring carrying events to the consumer thread
//!
//! Slots are pre-allocated and indexed by `sequence & mask`. Every slot holds
//! a sequence stamp: a producer may claim position `p` only when the stamp
//! equals `p`, publishes by storing `p + 1`, and the consumer frees the slot
//! for the next lap by storing `p + capacity`. A producer can therefore never
//! overwrite a slot the consumer has not released.

use super::error::{PipelineError, Result};
use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

const MIN_CAPACITY: usize = 2;

/// Outcome of [`RingTransport::try_emit`]
#[derive(Debug, PartialEq, Eq)]
pub enum EmitResult<T> {
    /// Queued under the given sequence number
    Accepted(u64),
    /// No free slot; the value is handed back
    Full(T),
    /// The ring was closed; the value is handed back
    Closed(T),
}

impl<T> EmitResult<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, EmitResult::Accepted(_))
    }
}

struct Slot<T> {
    stamp: AtomicU64,
    // Only the stamp owner touches the value, so this lock is never contended
    value: Mutex<Option<T>>,
}

pub struct RingTransport<T> {
    slots: Box<[CachePadded<Slot<T>>]>,
    mask: u64,
    tail: CachePadded<AtomicU64>,
    head: CachePadded<AtomicU64>,
    closed: AtomicBool,
    consumer_waiting: AtomicBool,
    wait_lock: Mutex<()>,
    wakeup: Condvar,
}

impl<T: Send> RingTransport<T> {
    /// Create a ring, rounding `capacity` up to a power of two
    ///
    /// The smallest ring has two slots: with one, a published slot and a
    /// free slot of the next lap carry the same stamp.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PipelineError::init("ring transport", "capacity must be at least 1"));
        }
        let capacity = capacity
            .max(MIN_CAPACITY)
            .checked_next_power_of_two()
            .ok_or_else(|| {
                PipelineError::init("ring transport", format!("capacity {} is too large", capacity))
            })?;

        let slots = (0..capacity as u64)
            .map(|seq| {
                CachePadded::new(Slot {
                    stamp: AtomicU64::new(seq),
                    value: Mutex::new(None),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            slots,
            mask: capacity as u64 - 1,
            tail: CachePadded::new(AtomicU64::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
            consumer_waiting: AtomicBool::new(false),
            wait_lock: Mutex::new(()),
            wakeup: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claimed slots not yet consumed
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.saturating_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity().saturating_sub(self.len())
    }

    /// Offer a value without blocking
    pub fn try_emit(&self, value: T) -> EmitResult<T> {
        if self.closed.load(Ordering::SeqCst) {
            return EmitResult::Closed(value);
        }

        let backoff = Backoff::new();
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(pos & self.mask) as usize];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == pos {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        *slot.value.lock() = Some(value);
                        slot.stamp.store(pos + 1, Ordering::Release);
                        self.wake_consumer();
                        return EmitResult::Accepted(pos);
                    }
                    Err(current) => {
                        pos = current;
                        backoff.spin();
                    }
                }
            } else if stamp < pos {
                // Slot from the previous lap is still unconsumed
                return EmitResult::Full(value);
            } else {
                pos = self.tail.load(Ordering::Relaxed);
                backoff.spin();
            }
        }
    }

    /// Take the next published value
    ///
    /// Returns `None` when the ring is empty or the next claimed slot is not
    /// yet published.
    pub fn try_pop(&self) -> Option<(u64, T)> {
        let backoff = Backoff::new();
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(pos & self.mask) as usize];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == pos + 1 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = slot.value.lock().take();
                        slot.stamp.store(pos + self.mask + 1, Ordering::Release);
                        return value.map(|v| (pos, v));
                    }
                    Err(current) => {
                        pos = current;
                        backoff.spin();
                    }
                }
            } else if stamp <= pos {
                return None;
            } else {
                pos = self.head.load(Ordering::Relaxed);
                backoff.spin();
            }
        }
    }

    /// Lazily take every value published so far
    ///
    /// Meant for the single consumer thread. Stops at the first slot that is
    /// empty or claimed but unpublished; call again after waiting.
    pub fn drain(&self) -> Drain<'_, T> {
        Drain { ring: self }
    }

    /// Park the consumer until a producer publishes or `timeout` elapses
    pub fn wait_for_events(&self, timeout: Duration) {
        let mut guard = self.wait_lock.lock();
        self.consumer_waiting.store(true, Ordering::SeqCst);
        if self.is_empty() && !self.is_closed() {
            self.wakeup.wait_for(&mut guard, timeout);
        }
        self.consumer_waiting.store(false, Ordering::SeqCst);
    }

    /// Wake a parked consumer
    pub fn notify_consumer(&self) {
        let _guard = self.wait_lock.lock();
        self.wakeup.notify_one();
    }

    /// Reject further `try_emit` calls; already queued values stay drainable
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify_consumer();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn wake_consumer(&self) {
        // Pairs with the store in wait_for_events so a publish is never missed
        fence(Ordering::SeqCst);
        if self.consumer_waiting.load(Ordering::SeqCst) {
            self.notify_consumer();
        }
    }
}

impl<T> std::fmt::Debug for RingTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingTransport")
            .field("capacity", &self.slots.len())
            .field("head", &self.head.load(Ordering::Relaxed))
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Iterator returned by [`RingTransport::drain`]
pub struct Drain<'a, T> {
    ring: &'a RingTransport<T>,
}

impl<T: Send> Iterator for Drain<'_, T> {
    type Item = (u64, T);

    fn next(&mut self) -> Option<Self::Item> {
        self.ring.try_pop()
    }
}
