//! Configuration generations and the in-flight accounting that guards swaps
//!
//! Every admitted event holds an [`EventPermit`] on the generation that was
//! active when it was admitted. The permit travels through the ring with the
//! event and is released when dispatch finishes, on every exit path. A
//! generation moves `Active -> Draining` when it is replaced and
//! `Draining -> Retired` once its last permit is released.

use super::configuration::Configuration;
use super::error::{PipelineError, Result};
use super::status::StatusLogger;
use arc_swap::ArcSwap;
use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How a configuration swap treats events still in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReliabilityStrategy {
    /// Wait, polling with backoff, until the old generation drains
    #[default]
    AwaitCompletion,
    /// Swap and return at once; queued events still format against the
    /// outgoing configuration
    AwaitUnconditionally,
    /// Block producers with a write lock for the duration of the swap
    Locking,
}

impl FromStr for ReliabilityStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "awaitcompletion" | "await_completion" => Ok(ReliabilityStrategy::AwaitCompletion),
            "awaitunconditionally" | "await_unconditionally" => {
                Ok(ReliabilityStrategy::AwaitUnconditionally)
            }
            "locking" => Ok(ReliabilityStrategy::Locking),
            _ => Err(format!("Invalid reliability strategy: '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Active,
    Draining,
    Retired,
}

impl GenerationState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => GenerationState::Active,
            1 => GenerationState::Draining,
            _ => GenerationState::Retired,
        }
    }
}

/// One installed configuration and its in-flight count
pub struct Generation {
    id: u64,
    config: Arc<Configuration>,
    in_flight: CachePadded<AtomicUsize>,
    state: AtomicU8,
}

impl Generation {
    fn new(id: u64, config: Arc<Configuration>) -> Self {
        Self {
            id,
            config,
            in_flight: CachePadded::new(AtomicUsize::new(0)),
            state: AtomicU8::new(GenerationState::Active as u8),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> GenerationState {
        GenerationState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn begin_draining(&self) {
        self.state.store(GenerationState::Draining as u8, Ordering::SeqCst);
        if self.in_flight() == 0 {
            self.retire();
        }
    }

    fn retire(&self) {
        let _ = self.state.compare_exchange(
            GenerationState::Draining as u8,
            GenerationState::Retired as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1
            && self.state() == GenerationState::Draining
        {
            self.retire();
        }
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generation")
            .field("id", &self.id)
            .field("config", &self.config.name())
            .field("in_flight", &self.in_flight())
            .field("state", &self.state())
            .finish()
    }
}

/// Token for one admitted event; dropping it ends the event
#[derive(Debug)]
pub struct EventPermit {
    generation: Arc<Generation>,
}

impl EventPermit {
    pub fn generation_id(&self) -> u64 {
        self.generation.id
    }

    /// Configuration the event was admitted under
    pub fn config(&self) -> &Arc<Configuration> {
        &self.generation.config
    }
}

impl Drop for EventPermit {
    fn drop(&mut self) {
        self.generation.release();
    }
}

/// Held by producers during admission under the `Locking` strategy
pub struct AdmissionGuard<'a> {
    _guard: Option<RwLockReadGuard<'a, ()>>,
}

/// Tracks generations and gates configuration swaps
pub struct ReliabilityCoordinator {
    strategy: ReliabilityStrategy,
    current: ArcSwap<Generation>,
    previous: Mutex<Option<Arc<Generation>>>,
    swap_lock: RwLock<()>,
    reconfigure_lock: Mutex<u64>,
    timeout: Option<Duration>,
    fail_on_timeout: bool,
    status: Arc<StatusLogger>,
}

impl ReliabilityCoordinator {
    pub fn new(
        strategy: ReliabilityStrategy,
        initial: Arc<Configuration>,
        status: Arc<StatusLogger>,
    ) -> Self {
        Self {
            strategy,
            current: ArcSwap::from_pointee(Generation::new(1, initial)),
            previous: Mutex::new(None),
            swap_lock: RwLock::new(()),
            reconfigure_lock: Mutex::new(1),
            timeout: None,
            fail_on_timeout: false,
            status,
        }
    }

    /// Bound the drain wait; with `fail` set a timeout fails `reconfigure`
    #[must_use = "builder methods return a new value"]
    pub fn with_timeout(mut self, timeout: Option<Duration>, fail: bool) -> Self {
        self.timeout = timeout;
        self.fail_on_timeout = fail;
        self
    }

    pub fn strategy(&self) -> ReliabilityStrategy {
        self.strategy
    }

    pub fn current(&self) -> Arc<Generation> {
        self.current.load_full()
    }

    pub fn current_config(&self) -> Arc<Configuration> {
        Arc::clone(&self.current.load().config)
    }

    pub fn generation_id(&self) -> u64 {
        self.current.load().id
    }

    /// The replaced generation, while it is still draining
    pub fn draining(&self) -> Option<Arc<Generation>> {
        let mut previous = self.previous.lock();
        if previous
            .as_ref()
            .is_some_and(|g| g.state() == GenerationState::Retired)
        {
            *previous = None;
        }
        previous.clone()
    }

    /// Events admitted and not yet finished, across live generations
    pub fn in_flight(&self) -> usize {
        let current = self.current.load().in_flight();
        current + self.draining().map_or(0, |g| g.in_flight())
    }

    /// Producers hold this across admission; only `Locking` takes the lock
    pub fn admission_guard(&self) -> AdmissionGuard<'_> {
        let guard = match self.strategy {
            // Recursive read so a producer re-entering from a sink cannot
            // deadlock behind a queued writer
            ReliabilityStrategy::Locking => Some(self.swap_lock.read_recursive()),
            _ => None,
        };
        AdmissionGuard { _guard: guard }
    }

    /// Admit one event against the active generation
    pub fn begin_event(&self) -> EventPermit {
        loop {
            let generation = self.current.load_full();
            generation.in_flight.fetch_add(1, Ordering::SeqCst);
            // A swap may have started between the load and the increment
            if generation.state() == GenerationState::Active {
                return EventPermit { generation };
            }
            generation.release();
        }
    }

    pub fn end_event(&self, permit: EventPermit) {
        drop(permit);
    }

    /// Install `config` as the active generation
    ///
    /// Returns the new generation id once the swap is safe per strategy.
    /// `on_consumer_thread` skips the drain wait, which would otherwise wait
    /// on the caller itself.
    pub fn reconfigure(&self, config: Arc<Configuration>, on_consumer_thread: bool) -> Result<u64> {
        let mut last_id = self.reconfigure_lock.lock();

        // At most two live generations: finish the previous drain first
        if let Some(previous) = self.draining() {
            if self.should_wait(on_consumer_thread) {
                self.await_drain(&previous)?;
            }
        }

        let id = *last_id + 1;
        let next = Arc::new(Generation::new(id, config));
        let old = match self.strategy {
            ReliabilityStrategy::Locking => {
                let _write = self.swap_lock.write();
                let old = self.current.swap(Arc::clone(&next));
                old.begin_draining();
                old
            }
            _ => {
                let old = self.current.swap(Arc::clone(&next));
                old.begin_draining();
                old
            }
        };
        *last_id = id;
        *self.previous.lock() = Some(Arc::clone(&old));

        if on_consumer_thread && self.strategy == ReliabilityStrategy::AwaitCompletion {
            self.status.warn(format!(
                "Reconfigure to generation {} called from the consumer thread, not waiting for generation {} to drain",
                id, old.id
            ));
        }
        if self.should_wait(on_consumer_thread) {
            self.await_drain(&old)?;
        }
        Ok(id)
    }

    fn should_wait(&self, on_consumer_thread: bool) -> bool {
        self.strategy == ReliabilityStrategy::AwaitCompletion && !on_consumer_thread
    }

    fn await_drain(&self, generation: &Generation) -> Result<()> {
        let started = Instant::now();
        let backoff = Backoff::new();
        while generation.state() != GenerationState::Retired {
            let waited = started.elapsed();
            if let Some(timeout) = self.timeout {
                if waited >= timeout {
                    let in_flight = generation.in_flight();
                    if self.fail_on_timeout {
                        return Err(PipelineError::reconfiguration_timeout(
                            generation.id,
                            in_flight,
                            waited,
                        ));
                    }
                    self.status.warn(format!(
                        "Generation {} still has {} events in flight after {:?}, proceeding",
                        generation.id, in_flight, waited
                    ));
                    return Ok(());
                }
            }
            if backoff.is_completed() {
                thread::sleep(Duration::from_millis(1));
            } else {
                backoff.snooze();
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ReliabilityCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReliabilityCoordinator")
            .field("strategy", &self.strategy)
            .field("current", &*self.current.load_full())
            .field("previous", &*self.previous.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_level::LogLevel;

    fn coordinator(strategy: ReliabilityStrategy) -> ReliabilityCoordinator {
        ReliabilityCoordinator::new(
            strategy,
            Arc::new(Configuration::builder("first").build()),
            Arc::new(StatusLogger::new(LogLevel::Debug)),
        )
    }

    fn named(name: &str) -> Arc<Configuration> {
        Arc::new(Configuration::builder(name).build())
    }

    #[test]
    fn test_permit_counts() {
        let coordinator = coordinator(ReliabilityStrategy::AwaitCompletion);
        let a = coordinator.begin_event();
        let b = coordinator.begin_event();
        assert_eq!(coordinator.in_flight(), 2);
        assert_eq!(a.generation_id(), 1);

        coordinator.end_event(a);
        drop(b);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[test]
    fn test_swap_without_in_flight_retires_immediately() {
        let coordinator = coordinator(ReliabilityStrategy::AwaitCompletion);
        let old = coordinator.current();
        assert_eq!(coordinator.reconfigure(named("second"), false).unwrap(), 2);
        assert_eq!(old.state(), GenerationState::Retired);
        assert_eq!(coordinator.current_config().name(), "second");
        assert!(coordinator.draining().is_none());
    }

    #[test]
    fn test_await_completion_waits_for_permits() {
        let coordinator = Arc::new(coordinator(ReliabilityStrategy::AwaitCompletion));
        let permit = coordinator.begin_event();

        let swapper = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || coordinator.reconfigure(named("second"), false))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!swapper.is_finished());
        // Old permit still sees the old configuration
        assert_eq!(permit.config().name(), "first");
        // New admissions already land on the new generation
        assert_eq!(coordinator.begin_event().generation_id(), 2);

        drop(permit);
        assert_eq!(swapper.join().unwrap().unwrap(), 2);
    }

    #[test]
    fn test_await_unconditionally_returns_at_once() {
        let coordinator = coordinator(ReliabilityStrategy::AwaitUnconditionally);
        let permit = coordinator.begin_event();
        coordinator.reconfigure(named("second"), false).unwrap();

        let old = coordinator.draining().unwrap();
        assert_eq!(old.state(), GenerationState::Draining);
        assert_eq!(permit.config().name(), "first");
        drop(permit);
        assert_eq!(old.state(), GenerationState::Retired);
    }

    #[test]
    fn test_timeout_fails_or_proceeds() {
        let failing = coordinator(ReliabilityStrategy::AwaitCompletion)
            .with_timeout(Some(Duration::from_millis(20)), true);
        let _held = failing.begin_event();
        let err = failing.reconfigure(named("second"), false).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ReconfigurationTimeout { generation: 1, in_flight: 1, .. }
        ));

        let status = Arc::new(StatusLogger::new(LogLevel::Debug));
        let lenient = ReliabilityCoordinator::new(
            ReliabilityStrategy::AwaitCompletion,
            named("first"),
            Arc::clone(&status),
        )
        .with_timeout(Some(Duration::from_millis(20)), false);
        let _held = lenient.begin_event();
        assert_eq!(lenient.reconfigure(named("second"), false).unwrap(), 2);
        assert_eq!(status.entries_containing("proceeding").len(), 1);
    }

    #[test]
    fn test_consumer_thread_does_not_wait() {
        let coordinator = coordinator(ReliabilityStrategy::AwaitCompletion);
        let _held = coordinator.begin_event();
        assert_eq!(coordinator.reconfigure(named("second"), true).unwrap(), 2);
    }

    #[test]
    fn test_locking_blocks_admission_during_swap() {
        let coordinator = coordinator(ReliabilityStrategy::Locking);
        {
            let _admission = coordinator.admission_guard();
            assert!(coordinator.swap_lock.try_write().is_none());
        }
        coordinator.reconfigure(named("second"), false).unwrap();
        assert_eq!(coordinator.generation_id(), 2);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "await_unconditionally".parse::<ReliabilityStrategy>().unwrap(),
            ReliabilityStrategy::AwaitUnconditionally
        );
        assert!("eventually".parse::<ReliabilityStrategy>().is_err());
    }
}
