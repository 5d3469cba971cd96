//! Pipeline lifecycle: admission on caller threads, the consumer thread and
//! dispatch to appenders
//!
//! ```text
//! caller ── emit ──> [admission + permit] ──> RingTransport ──> consumer ──> Dispatcher ──> sinks
//!                         │ full                                              ^
//!                         └── QueueFullPolicy ── synchronous ─────────────────┘
//! ```
//!
//! Nothing raised while dispatching an event reaches the caller or stops
//! the consumer: failures are counted in [`PipelineMetrics`] and reported
//! through the [`StatusLogger`].

use super::configuration::{AppenderBinding, Configuration};
use super::error::{PipelineError, Result};
use super::instant::{Clock, SystemClock};
use super::log_context::ThreadContext;
use super::log_event::EventRecord;
use super::log_level::LogLevel;
use super::logger::Logger;
use super::metrics::PipelineMetrics;
use super::queue_full_policy::{EnqueueAttempt, QueueFullAction, QueueFullPolicy};
use super::recycler::{string_recycler, Recycler, RecyclerFactory, RecyclerKind};
use super::registry::{PolicyContext, PolicyRegistry};
use super::reliability::{EventPermit, ReliabilityCoordinator, ReliabilityStrategy};
use super::ring::{EmitResult, RingTransport};
use super::settings::{AfterStopAction, PipelineSettings};
use super::status::StatusLogger;
use crate::pattern::panic_message;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

pub const CONSUMER_THREAD_NAME: &str = "log-pipeline-consumer";

/// How long an idle consumer parks before re-checking control messages
const IDLE_WAIT: Duration = Duration::from_millis(10);

/// What `emit` did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Accepted by the ring under this sequence number
    Queued(u64),
    /// Dispatched on the calling thread
    Synchronous,
    /// Dropped by the queue-full policy
    Discarded,
    /// Below the configured level
    Filtered,
    /// Dropped because the pipeline is stopping or stopped
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Initialized,
    Running,
    Stopping,
    Stopped,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Initialized,
            1 => PipelineState::Running,
            2 => PipelineState::Stopping,
            _ => PipelineState::Stopped,
        }
    }
}

/// Everything one pipeline owns that would otherwise be a process global
pub struct PipelineContext {
    settings: PipelineSettings,
    status: Arc<StatusLogger>,
    metrics: Arc<PipelineMetrics>,
    recyclers: RecyclerFactory,
    clock: Arc<dyn Clock>,
    thread_context: ThreadContext,
}

impl PipelineContext {
    pub fn new(
        settings: PipelineSettings,
        status: Arc<StatusLogger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let recyclers = settings.recycler_factory();
        Self {
            settings,
            status,
            metrics: Arc::new(PipelineMetrics::new()),
            recyclers,
            clock,
            thread_context: ThreadContext::new(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn status(&self) -> &Arc<StatusLogger> {
        &self.status
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn recyclers(&self) -> &RecyclerFactory {
        &self.recyclers
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn thread_context(&self) -> &ThreadContext {
        &self.thread_context
    }
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("settings", &self.settings)
            .field("recyclers", &self.recyclers)
            .finish()
    }
}

struct QueuedEvent {
    record: EventRecord,
    permit: EventPermit,
}

enum Control {
    Flush(Sender<()>),
}

/// Renders events and hands them to sinks
struct Dispatcher {
    status: Arc<StatusLogger>,
    metrics: Arc<PipelineMetrics>,
    buffers: Recycler<String>,
}

impl Dispatcher {
    /// Route and write one event; returns how many appenders accepted it
    fn dispatch(&self, record: &EventRecord, config: &Configuration) -> usize {
        if !config.filter_decision(record).passes() {
            self.metrics.record_filtered();
            return 0;
        }

        let mut delivered = 0;
        for (index, route) in config.route_chain(&record.logger_name).enumerate() {
            if index == 0 && record.level < route.level() {
                self.metrics.record_filtered();
                return 0;
            }
            if !route.filters().decide(record).passes() {
                self.metrics.record_filtered();
                break;
            }
            for appender_ref in route.refs() {
                if !appender_ref.accepts(record.level) {
                    continue;
                }
                match config.appender(&appender_ref.name) {
                    Some(binding) => {
                        if self.write(record, &appender_ref.name, binding) {
                            delivered += 1;
                        }
                    }
                    None => {
                        let key = format!("missing-appender:{}", appender_ref.name);
                        self.status.warn_once(&key, || {
                            format!(
                                "Appender '{}' is not defined in configuration '{}', events routed to it are skipped",
                                appender_ref.name,
                                config.name()
                            )
                        });
                    }
                }
            }
        }
        delivered
    }

    fn write(&self, record: &EventRecord, name: &str, binding: &AppenderBinding) -> bool {
        let mut buf = self.buffers.scoped();
        for failure in binding.layout.render(record, &mut buf) {
            self.metrics.record_format_failure();
            if failure.first_report {
                self.status.error(format!(
                    "Converter '{}' failed for appender '{}': {}. Rendering '<{}:error>' instead",
                    failure.converter, name, failure.message, failure.converter
                ));
            }
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| binding.sink.write(buf.as_str())));
        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.metrics.record_sink_failure();
                self.status.error(format!("Appender '{}' failed: {}", name, e));
                false
            }
            Err(payload) => {
                self.metrics.record_sink_failure();
                self.status.error(format!(
                    "Appender '{}' panicked: {}. Other appenders continue to function.",
                    name,
                    panic_message(payload.as_ref())
                ));
                false
            }
        }
    }

    fn flush(&self, config: &Configuration) {
        for (name, binding) in config.appenders() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| binding.sink.flush()));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.metrics.record_sink_failure();
                    self.status.error(format!("Appender '{}' flush failed: {}", name, e));
                }
                Err(payload) => {
                    self.metrics.record_sink_failure();
                    self.status.error(format!(
                        "Appender '{}' panicked during flush: {}",
                        name,
                        panic_message(payload.as_ref())
                    ));
                }
            }
        }
    }
}

/// State shared by the pipeline, its logger handles and the consumer
pub(crate) struct Shared {
    context: PipelineContext,
    ring: RingTransport<QueuedEvent>,
    coordinator: ReliabilityCoordinator,
    policy: Arc<dyn QueueFullPolicy>,
    dispatcher: Dispatcher,
    state: AtomicU8,
    consumer_thread: OnceLock<ThreadId>,
    abandon: AtomicBool,
}

impl Shared {
    pub(crate) fn context(&self) -> &PipelineContext {
        &self.context
    }

    fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn is_consumer_thread(&self) -> bool {
        self.consumer_thread
            .get()
            .is_some_and(|id| *id == thread::current().id())
    }

    pub(crate) fn is_enabled(&self, logger: &str, level: LogLevel) -> bool {
        self.coordinator.current_config().is_enabled(logger, level)
    }

    pub(crate) fn record_filtered(&self) {
        self.context.metrics.record_filtered();
    }

    pub(crate) fn emit(&self, record: EventRecord) -> EmitOutcome {
        match self.state() {
            PipelineState::Running => {}
            PipelineState::Initialized => {
                let permit = self.coordinator.begin_event();
                return self.dispatch_admitted(record, permit);
            }
            PipelineState::Stopping | PipelineState::Stopped => {
                return self.after_stop(record, None);
            }
        }

        let _admission = self.coordinator.admission_guard();
        let permit = self.coordinator.begin_event();
        if !permit.config().is_enabled(&record.logger_name, record.level) {
            self.context.metrics.record_filtered();
            return EmitOutcome::Filtered;
        }

        let mut record = record;
        record.generation = permit.generation_id();
        let mut event = QueuedEvent { record, permit };
        let mut attempt: Option<EnqueueAttempt> = None;
        let backoff = Backoff::new();

        loop {
            match self.ring.try_emit(event) {
                EmitResult::Accepted(seq) => {
                    self.context.metrics.record_enqueued();
                    return EmitOutcome::Queued(seq + 1);
                }
                EmitResult::Closed(rejected) => {
                    return self.after_stop(rejected.record, Some(rejected.permit));
                }
                EmitResult::Full(full) => {
                    event = full;
                    let attempt = attempt.get_or_insert_with(|| {
                        self.context.metrics.record_queue_full();
                        EnqueueAttempt::new(self.is_consumer_thread())
                    });
                    match self.policy.on_queue_full(&event.record, attempt) {
                        QueueFullAction::Retry => {
                            self.context.metrics.record_retry();
                            attempt.retries += 1;
                            if backoff.is_completed() {
                                thread::sleep(Duration::from_micros(100));
                            } else {
                                backoff.snooze();
                            }
                        }
                        QueueFullAction::Discard => {
                            self.context.metrics.record_discarded();
                            return EmitOutcome::Discarded;
                        }
                        QueueFullAction::Synchronous => {
                            return self.dispatch_admitted(event.record, event.permit);
                        }
                    }
                }
            }
        }
    }

    /// Dispatch on the calling thread against the permit's generation
    fn dispatch_admitted(&self, record: EventRecord, permit: EventPermit) -> EmitOutcome {
        let mut record = record;
        record.generation = permit.generation_id();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.dispatcher.dispatch(&record, permit.config());
            self.dispatcher.flush(permit.config());
        }));
        if let Err(payload) = outcome {
            self.context.status.error(format!(
                "Synchronous dispatch panicked: {}",
                panic_message(payload.as_ref())
            ));
        }
        self.context.metrics.record_dispatched_sync();
        drop(permit);
        EmitOutcome::Synchronous
    }

    fn after_stop(&self, record: EventRecord, permit: Option<EventPermit>) -> EmitOutcome {
        self.context.metrics.record_rejected_after_stop();
        let action = self.context.settings.after_stop;
        self.context.status.warn_once("emit-after-stop", || {
            format!(
                "Event emitted after the pipeline stopped; applying after-stop action {:?}",
                action
            )
        });
        match action {
            AfterStopAction::Synchronous => {
                let permit = permit.unwrap_or_else(|| self.coordinator.begin_event());
                self.dispatch_admitted(record, permit)
            }
            AfterStopAction::Discard => EmitOutcome::Rejected,
        }
    }

    fn process(&self, seq: u64, event: QueuedEvent) {
        let QueuedEvent { mut record, permit } = event;
        record.sequence = seq + 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.dispatcher.dispatch(&record, permit.config());
        }));
        if let Err(payload) = outcome {
            self.context.status.error(format!(
                "Dispatch of event {} panicked: {}",
                record.sequence,
                panic_message(payload.as_ref())
            ));
        }
        self.context.metrics.record_dispatched_async();
        drop(permit);
    }

    /// Process everything currently published; returns the count
    fn drain_batch(&self, touched: &mut Vec<Arc<Configuration>>) -> usize {
        let mut processed = 0;
        while let Some((seq, event)) = self.ring.try_pop() {
            let config = event.permit.config();
            if !touched.iter().any(|c| Arc::ptr_eq(c, config)) {
                touched.push(Arc::clone(config));
            }
            self.process(seq, event);
            processed += 1;
            if self.abandon.load(Ordering::Relaxed) {
                break;
            }
        }
        processed
    }

    fn flush_touched(&self, touched: &mut Vec<Arc<Configuration>>) {
        for config in touched.drain(..) {
            self.dispatcher.flush(&config);
        }
    }

    fn run_consumer(&self, control: Receiver<Control>) {
        let mut touched = Vec::new();
        loop {
            if self.abandon.load(Ordering::Relaxed) {
                break;
            }

            let processed = self.drain_batch(&mut touched);
            if processed > 0 {
                self.flush_touched(&mut touched);
            }

            while let Ok(Control::Flush(ack)) = control.try_recv() {
                self.drain_batch(&mut touched);
                touched.push(self.coordinator.current_config());
                self.flush_touched(&mut touched);
                let _ = ack.send(());
            }

            if self.ring.is_closed() && self.ring.is_empty() && self.coordinator.in_flight() == 0 {
                break;
            }

            if processed == 0 {
                self.policy.report_pending();
                self.ring.wait_for_events(IDLE_WAIT);
            }
        }
        self.policy.report_pending();
    }
}

/// An asynchronous logging pipeline
///
/// # Example
///
/// ```
/// use rust_log_pipeline::prelude::*;
/// use std::sync::Arc;
///
/// let memory = Arc::new(InMemoryAppender::new("memory"));
/// let config = Configuration::builder("app")
///     .root_ref("memory")
///     .sink(memory.clone(), FormatterChain::from_pattern("%p %c - %m").unwrap())
///     .build();
///
/// let pipeline = Pipeline::builder()
///     .ring_buffer_size(1024)
///     .configuration(config)
///     .start()
///     .unwrap();
///
/// pipeline.logger("app.http").info("listening");
/// assert!(pipeline.stop(DEFAULT_SHUTDOWN_TIMEOUT));
/// assert_eq!(memory.messages(), vec!["INFO app.http - listening"]);
/// ```
pub struct Pipeline {
    shared: Arc<Shared>,
    control: Sender<Control>,
    control_rx: Receiver<Control>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Spawn the consumer thread
    pub fn start(&self) -> Result<()> {
        match self.shared.state.compare_exchange(
            PipelineState::Initialized as u8,
            PipelineState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(current) => {
                return match PipelineState::from_u8(current) {
                    PipelineState::Running => Ok(()),
                    _ => Err(PipelineError::PipelineStopped),
                };
            }
        }

        let shared = Arc::clone(&self.shared);
        let control = self.control_rx.clone();
        let handle = thread::Builder::new()
            .name(CONSUMER_THREAD_NAME.to_string())
            .spawn(move || shared.run_consumer(control))
            .map_err(|e| {
                self.shared
                    .state
                    .store(PipelineState::Initialized as u8, Ordering::SeqCst);
                PipelineError::init("consumer thread", e.to_string())
            })?;

        let _ = self.shared.consumer_thread.set(handle.thread().id());
        *self.consumer.lock() = Some(handle);
        self.shared.context.status.debug(format!(
            "Pipeline started: ring capacity {}, policy {}, strategy {:?}",
            self.shared.ring.capacity(),
            self.shared.policy.name(),
            self.shared.coordinator.strategy()
        ));
        Ok(())
    }

    /// Admit one event; never blocks beyond the policy's retries
    pub fn emit(&self, record: EventRecord) -> EmitOutcome {
        self.shared.emit(record)
    }

    /// Handle emitting under `name`
    pub fn logger(&self, name: &str) -> Logger {
        Logger::new(Arc::clone(&self.shared), name)
    }

    /// Install a new configuration, blocking per the reliability strategy
    ///
    /// Returns the id of the new generation.
    pub fn reconfigure(&self, config: Configuration) -> Result<u64> {
        if self.state() == PipelineState::Stopped {
            return Err(PipelineError::PipelineStopped);
        }
        let config = config.bind_recyclers(&self.shared.context.recyclers)?;
        let name = config.name().to_string();
        let id = self
            .shared
            .coordinator
            .reconfigure(Arc::new(config), self.shared.is_consumer_thread())?;
        self.shared
            .context
            .status
            .info(format!("Configuration '{}' active as generation {}", name, id));
        Ok(id)
    }

    /// Wait until everything queued so far has been written and flushed
    pub fn flush(&self, timeout: Duration) -> bool {
        let consumer_alive = self
            .consumer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());

        if !consumer_alive || self.shared.is_consumer_thread() {
            self.shared
                .dispatcher
                .flush(&self.shared.coordinator.current_config());
            return true;
        }

        let (ack, done) = bounded(1);
        if self.control.send(Control::Flush(ack)).is_err() {
            return false;
        }
        self.shared.ring.notify_consumer();
        done.recv_timeout(timeout).is_ok()
    }

    /// Drain queued events and stop the consumer
    ///
    /// Events emitted from now on get the configured after-stop action.
    /// Returns `true` if the consumer finished within `timeout`; events
    /// still queued after that are counted as dropped.
    pub fn stop(&self, timeout: Duration) -> bool {
        let previous = self.shared.state.swap(PipelineState::Stopping as u8, Ordering::SeqCst);
        match PipelineState::from_u8(previous) {
            PipelineState::Running => {}
            PipelineState::Initialized => {
                self.shared.ring.close();
                self.set_state(PipelineState::Stopped);
                return true;
            }
            state => {
                self.set_state(state);
                return true;
            }
        }

        let status = &self.shared.context.status;
        let metrics = &self.shared.context.metrics;
        self.shared.ring.close();

        let mut clean = true;
        if let Some(handle) = self.consumer.lock().take() {
            let start = Instant::now();
            loop {
                if handle.is_finished() {
                    if let Err(e) = handle.join() {
                        status.error(format!("Consumer thread panicked during shutdown: {:?}", e));
                        clean = false;
                    }
                    break;
                }

                if start.elapsed() >= timeout {
                    status.warn(format!(
                        "Consumer thread did not finish within {:?}, abandoning queued events",
                        timeout
                    ));
                    self.shared.abandon.store(true, Ordering::Relaxed);
                    clean = false;
                    break;
                }

                thread::sleep(Duration::from_millis(10));
            }
        }

        // Stragglers published after the consumer's last check
        let mut dropped = 0;
        let mut touched = Vec::new();
        while let Some((seq, event)) = self.shared.ring.try_pop() {
            if clean {
                if !touched.iter().any(|c| Arc::ptr_eq(c, event.permit.config())) {
                    touched.push(Arc::clone(event.permit.config()));
                }
                self.shared.process(seq, event);
            } else {
                dropped += 1;
            }
        }
        self.shared.flush_touched(&mut touched);
        self.shared.dispatcher.flush(&self.shared.coordinator.current_config());

        if dropped > 0 {
            metrics.record_dropped_on_shutdown(dropped);
        }
        let lost = metrics.discarded() + metrics.dropped_on_shutdown();
        if lost > 0 {
            status.warn(format!(
                "Pipeline stopped with {} dropped events (drop rate: {:.2}%)",
                lost,
                metrics.drop_rate() * 100.0
            ));
        }

        self.set_state(PipelineState::Stopped);
        clean
    }

    fn set_state(&self, state: PipelineState) {
        self.shared.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    pub fn context(&self) -> &PipelineContext {
        &self.shared.context
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.shared.context.settings
    }

    pub fn status(&self) -> &Arc<StatusLogger> {
        &self.shared.context.status
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.shared.context.metrics
    }

    pub fn thread_context(&self) -> &ThreadContext {
        &self.shared.context.thread_context
    }

    pub fn configuration(&self) -> Arc<Configuration> {
        self.shared.coordinator.current_config()
    }

    pub fn generation(&self) -> u64 {
        self.shared.coordinator.generation_id()
    }

    /// Events admitted and not yet dispatched
    pub fn in_flight(&self) -> usize {
        self.shared.coordinator.in_flight()
    }

    pub fn queued(&self) -> usize {
        self.shared.ring.len()
    }

    pub fn ring_capacity(&self) -> usize {
        self.shared.ring.capacity()
    }

    pub fn policy_name(&self) -> &str {
        self.shared.policy.name()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.is_running() {
            let timeout = self.shared.context.settings.shutdown_timeout;
            self.stop(timeout);
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state())
            .field("ring", &self.shared.ring)
            .field("policy", &self.shared.policy.name())
            .field("coordinator", &self.shared.coordinator)
            .finish()
    }
}

/// Builder for constructing a [`Pipeline`] with a fluent API
///
/// # Example
///
/// ```
/// use rust_log_pipeline::prelude::*;
/// use std::time::Duration;
///
/// let pipeline = Pipeline::builder()
///     .ring_buffer_size(4096)
///     .queue_full_policy("Discard")
///     .discard_threshold(LogLevel::Debug)
///     .reliability_strategy(ReliabilityStrategy::AwaitCompletion)
///     .reconfigure_timeout(Duration::from_secs(2), false)
///     .build()
///     .unwrap();
///
/// assert_eq!(pipeline.ring_capacity(), 4096);
/// assert_eq!(pipeline.policy_name(), "Discard");
/// ```
pub struct PipelineBuilder {
    settings: PipelineSettings,
    configuration: Option<Configuration>,
    registry: Option<Arc<PolicyRegistry>>,
    policy: Option<Arc<dyn QueueFullPolicy>>,
    status: Option<Arc<StatusLogger>>,
    clock: Option<Arc<dyn Clock>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            settings: PipelineSettings::default(),
            configuration: None,
            registry: None,
            policy: None,
            status: None,
            clock: None,
        }
    }

    /// Replace every knob at once, e.g. with settings read from a property source
    #[must_use = "builder methods return a new value"]
    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn ring_buffer_size(mut self, size: usize) -> Self {
        self.settings.ring_buffer_size = size;
        self
    }

    /// Select a queue-full policy by registry name
    #[must_use = "builder methods return a new value"]
    pub fn queue_full_policy(mut self, name: &str) -> Self {
        self.settings.queue_full_policy = name.to_string();
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn discard_threshold(mut self, level: LogLevel) -> Self {
        self.settings.discard_threshold = level;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn queue_full_retries(mut self, retries: u32) -> Self {
        self.settings.queue_full_retries = retries;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn discard_report_interval(mut self, interval: Duration) -> Self {
        self.settings.discard_report_interval = interval;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn reliability_strategy(mut self, strategy: ReliabilityStrategy) -> Self {
        self.settings.reliability_strategy = strategy;
        self
    }

    /// Bound the drain wait of `reconfigure`; `fail` turns a timeout into an error
    #[must_use = "builder methods return a new value"]
    pub fn reconfigure_timeout(mut self, timeout: Duration, fail: bool) -> Self {
        self.settings.reconfigure_timeout = Some(timeout);
        self.settings.fail_on_reconfigure_timeout = fail;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn recycler(mut self, kind: RecyclerKind, depth: usize) -> Self {
        self.settings.recycler = kind;
        self.settings.recycler_depth = depth;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn enable_thread_locals(mut self, enabled: bool) -> Self {
        self.settings.enable_thread_locals = enabled;
        self
    }

    /// Recycler strategy the current settings select
    ///
    /// Pattern layouts are rebound to it automatically; pass it to
    /// [`ChainBuilder::recycler`](crate::pattern::ChainBuilder::recycler) for
    /// layouts assembled by hand.
    pub fn recycler_factory(&self) -> RecyclerFactory {
        self.settings.recycler_factory()
    }

    #[must_use = "builder methods return a new value"]
    pub fn buffer_sizes(mut self, initial: usize, max_reusable: usize) -> Self {
        self.settings.initial_buffer_size = initial;
        self.settings.max_reusable_buffer_size = max_reusable;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.settings.shutdown_timeout = timeout;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn after_stop(mut self, action: AfterStopAction) -> Self {
        self.settings.after_stop = action;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn status_level(mut self, level: LogLevel) -> Self {
        self.settings.status_level = level;
        self
    }

    /// Initial configuration; defaults to one routing nothing
    #[must_use = "builder methods return a new value"]
    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// Registry used to resolve the policy name
    #[must_use = "builder methods return a new value"]
    pub fn registry(mut self, registry: Arc<PolicyRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use this policy instance instead of a registry lookup
    #[must_use = "builder methods return a new value"]
    pub fn policy(mut self, policy: Arc<dyn QueueFullPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Diagnostic channel; defaults to stderr at `status_level`
    #[must_use = "builder methods return a new value"]
    pub fn status_logger(mut self, status: Arc<StatusLogger>) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build a pipeline that has not started its consumer yet
    ///
    /// Until [`Pipeline::start`] is called, events are dispatched on the
    /// calling thread.
    pub fn build(self) -> Result<Pipeline> {
        let settings = self.settings;
        settings.validate()?;

        let status = self
            .status
            .unwrap_or_else(|| Arc::new(StatusLogger::with_stderr(settings.status_level)));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let policy = match self.policy {
            Some(policy) => policy,
            None => {
                let registry = self.registry.unwrap_or_default();
                let ctx = PolicyContext {
                    settings: &settings,
                    status: &status,
                };
                registry.create(&settings.queue_full_policy, &ctx)
            }
        };

        let ring = RingTransport::new(settings.ring_buffer_size)?;
        let configuration = self
            .configuration
            .unwrap_or_else(Configuration::empty)
            .bind_recyclers(&settings.recycler_factory())?;
        let configuration = Arc::new(configuration);
        let coordinator = ReliabilityCoordinator::new(
            settings.reliability_strategy,
            configuration,
            Arc::clone(&status),
        )
        .with_timeout(settings.reconfigure_timeout, settings.fail_on_reconfigure_timeout);

        let context = PipelineContext::new(settings, status, clock);
        let dispatcher = Dispatcher {
            status: Arc::clone(&context.status),
            metrics: Arc::clone(&context.metrics),
            buffers: string_recycler(
                &context.recyclers,
                context.settings.initial_buffer_size,
                context.settings.max_reusable_buffer_size,
            ),
        };

        let (control, control_rx) = unbounded();
        Ok(Pipeline {
            shared: Arc::new(Shared {
                context,
                ring,
                coordinator,
                policy,
                dispatcher,
                state: AtomicU8::new(PipelineState::Initialized as u8),
                consumer_thread: OnceLock::new(),
                abandon: AtomicBool::new(false),
            }),
            control,
            control_rx,
            consumer: Mutex::new(None),
        })
    }

    /// Build and start in one step
    pub fn start(self) -> Result<Pipeline> {
        let pipeline = self.build()?;
        pipeline.start()?;
        Ok(pipeline)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appenders::InMemoryAppender;
    use crate::core::appender::AppenderSink;
    use crate::core::configuration::Route;
    use crate::pattern::FormatterChain;

    #[derive(Debug)]
    struct FailingSink {
        panic: bool,
    }

    impl AppenderSink for FailingSink {
        fn write(&self, _rendered: &str) -> Result<()> {
            if self.panic {
                panic!("sink exploded");
            }
            Err(PipelineError::sink_write("disk full"))
        }

        fn name(&self) -> &str {
            if self.panic {
                "panicking"
            } else {
                "failing"
            }
        }
    }

    fn memory_config(memory: &Arc<InMemoryAppender>, pattern: &str) -> Configuration {
        Configuration::builder("memory")
            .default_level(LogLevel::Debug)
            .root_ref("memory")
            .sink(memory.clone(), FormatterChain::from_pattern(pattern).unwrap())
            .build()
    }

    fn quiet_status() -> Arc<StatusLogger> {
        Arc::new(StatusLogger::new(LogLevel::Debug))
    }

    #[test]
    fn test_async_delivery_and_stop() {
        let memory = Arc::new(InMemoryAppender::new("memory"));
        let pipeline = Pipeline::builder()
            .ring_buffer_size(64)
            .status_logger(quiet_status())
            .configuration(memory_config(&memory, "%sn %p %m"))
            .start()
            .unwrap();

        for i in 0..10 {
            let record = EventRecord::new("app", LogLevel::Info, format!("event {}", i));
            let outcome = pipeline.emit(record);
            assert!(matches!(outcome, EmitOutcome::Queued(_)));
        }
        assert!(pipeline.stop(Duration::from_secs(5)));
        assert_eq!(pipeline.state(), PipelineState::Stopped);

        let messages = memory.messages();
        assert_eq!(messages.len(), 10);
        assert_eq!(messages[0], "1 INFO event 0");
        assert_eq!(messages[9], "10 INFO event 9");
        assert_eq!(pipeline.metrics().dispatched_async(), 10);
        assert_eq!(pipeline.in_flight(), 0);
    }

    #[test]
    fn test_synchronous_before_start() {
        let memory = Arc::new(InMemoryAppender::new("memory"));
        let pipeline = Pipeline::builder()
            .status_logger(quiet_status())
            .configuration(memory_config(&memory, "%m"))
            .build()
            .unwrap();

        assert_eq!(
            pipeline.emit(EventRecord::new("app", LogLevel::Info, "early")),
            EmitOutcome::Synchronous
        );
        assert_eq!(memory.messages(), vec!["early"]);
        assert_eq!(pipeline.metrics().dispatched_sync(), 1);
    }

    #[test]
    fn test_level_gate_filters_before_queueing() {
        let memory = Arc::new(InMemoryAppender::new("memory"));
        let config = Configuration::builder("warn")
            .default_level(LogLevel::Warn)
            .root_ref("memory")
            .sink(memory.clone(), FormatterChain::from_pattern("%m").unwrap())
            .build();
        let pipeline = Pipeline::builder()
            .status_logger(quiet_status())
            .configuration(config)
            .start()
            .unwrap();

        assert_eq!(
            pipeline.emit(EventRecord::new("app", LogLevel::Info, "quiet")),
            EmitOutcome::Filtered
        );
        assert!(pipeline.stop(Duration::from_secs(5)));
        assert!(memory.is_empty());
        assert_eq!(pipeline.metrics().filtered(), 1);
    }

    #[test]
    fn test_after_stop_actions() {
        let memory = Arc::new(InMemoryAppender::new("memory"));
        let status = quiet_status();
        let pipeline = Pipeline::builder()
            .status_logger(Arc::clone(&status))
            .configuration(memory_config(&memory, "%m"))
            .start()
            .unwrap();
        assert!(pipeline.stop(Duration::from_secs(5)));

        assert_eq!(
            pipeline.emit(EventRecord::new("app", LogLevel::Info, "late")),
            EmitOutcome::Synchronous
        );
        pipeline.emit(EventRecord::new("app", LogLevel::Info, "later"));
        assert_eq!(memory.messages(), vec!["late", "later"]);
        assert_eq!(pipeline.metrics().rejected_after_stop(), 2);
        assert_eq!(status.entries_containing("after the pipeline stopped").len(), 1);

        let discarding = Pipeline::builder()
            .status_logger(quiet_status())
            .after_stop(AfterStopAction::Discard)
            .configuration(memory_config(&memory, "%m"))
            .start()
            .unwrap();
        assert!(discarding.stop(Duration::from_secs(5)));
        assert_eq!(
            discarding.emit(EventRecord::new("app", LogLevel::Info, "lost")),
            EmitOutcome::Rejected
        );
        assert_eq!(memory.len(), 2);
    }

    #[test]
    fn test_sink_failures_are_isolated() {
        let memory = Arc::new(InMemoryAppender::new("memory"));
        let status = quiet_status();
        let config = Configuration::builder("mixed")
            .root_ref("failing")
            .root_ref("panicking")
            .root_ref("memory")
            .sink(
                Arc::new(FailingSink { panic: false }),
                FormatterChain::from_pattern("%m").unwrap(),
            )
            .sink(
                Arc::new(FailingSink { panic: true }),
                FormatterChain::from_pattern("%m").unwrap(),
            )
            .sink(memory.clone(), FormatterChain::from_pattern("%m").unwrap())
            .build();
        let pipeline = Pipeline::builder()
            .status_logger(Arc::clone(&status))
            .configuration(config)
            .start()
            .unwrap();

        pipeline.emit(EventRecord::new("app", LogLevel::Info, "one"));
        pipeline.emit(EventRecord::new("app", LogLevel::Info, "two"));
        assert!(pipeline.stop(Duration::from_secs(5)));

        assert_eq!(memory.messages(), vec!["one", "two"]);
        assert_eq!(pipeline.metrics().sink_failures(), 4);
        assert!(!status.entries_containing("disk full").is_empty());
        assert!(!status.entries_containing("panicked").is_empty());
    }

    #[test]
    fn test_format_failure_placeholder_reported_once() {
        let memory = Arc::new(InMemoryAppender::new("memory"));
        let status = quiet_status();
        let pipeline = Pipeline::builder()
            .status_logger(Arc::clone(&status))
            .configuration(memory_config(&memory, "%d{%Q} %m"))
            .start()
            .unwrap();

        pipeline.emit(EventRecord::new("app", LogLevel::Info, "a"));
        pipeline.emit(EventRecord::new("app", LogLevel::Info, "b"));
        assert!(pipeline.stop(Duration::from_secs(5)));

        assert_eq!(memory.messages(), vec!["<date:error> a", "<date:error> b"]);
        assert_eq!(pipeline.metrics().format_failures(), 2);
        assert_eq!(status.entries_containing("Converter 'date' failed").len(), 1);
    }

    #[test]
    fn test_missing_appender_warns_once() {
        let status = quiet_status();
        let config = Configuration::builder("dangling").root_ref("nowhere").build();
        let pipeline = Pipeline::builder()
            .status_logger(Arc::clone(&status))
            .configuration(config)
            .start()
            .unwrap();

        pipeline.emit(EventRecord::new("app", LogLevel::Info, "a"));
        pipeline.emit(EventRecord::new("app", LogLevel::Info, "b"));
        assert!(pipeline.stop(Duration::from_secs(5)));
        assert_eq!(status.entries_containing("'nowhere'").len(), 1);
    }

    #[test]
    fn test_route_filters_and_additivity() {
        let all = Arc::new(InMemoryAppender::new("all"));
        let db = Arc::new(InMemoryAppender::new("db"));
        let config = Configuration::builder("routes")
            .default_level(LogLevel::Info)
            .root_ref("all")
            .route(Route::new("app.db", LogLevel::Debug).appender_ref("db").additive(false))
            .sink(all.clone(), FormatterChain::from_pattern("%c %m").unwrap())
            .sink(db.clone(), FormatterChain::from_pattern("%c %m").unwrap())
            .build();
        let pipeline = Pipeline::builder()
            .status_logger(quiet_status())
            .configuration(config)
            .build()
            .unwrap();

        pipeline.emit(EventRecord::new("app.db.pool", LogLevel::Debug, "checkout"));
        pipeline.emit(EventRecord::new("app.http", LogLevel::Info, "request"));
        assert_eq!(db.messages(), vec!["app.db.pool checkout"]);
        assert_eq!(all.messages(), vec!["app.http request"]);
    }

    #[test]
    fn test_reconfigure_switches_routing() {
        let first = Arc::new(InMemoryAppender::new("memory"));
        let second = Arc::new(InMemoryAppender::new("memory"));
        let pipeline = Pipeline::builder()
            .status_logger(quiet_status())
            .configuration(memory_config(&first, "%m"))
            .start()
            .unwrap();

        pipeline.emit(EventRecord::new("app", LogLevel::Info, "before"));
        assert_eq!(pipeline.reconfigure(memory_config(&second, "%m")).unwrap(), 2);
        // AwaitCompletion: everything admitted earlier has been written
        assert_eq!(first.messages(), vec!["before"]);

        pipeline.emit(EventRecord::new("app", LogLevel::Info, "after"));
        assert!(pipeline.stop(Duration::from_secs(5)));
        assert_eq!(second.messages(), vec!["after"]);
        assert_eq!(pipeline.generation(), 2);
        assert!(pipeline.reconfigure(Configuration::empty()).is_err());
    }

    #[test]
    fn test_disabled_thread_locals_reach_pattern_layouts() {
        let memory = Arc::new(InMemoryAppender::new("memory"));
        let builder = Pipeline::builder()
            .enable_thread_locals(false)
            .status_logger(quiet_status())
            .configuration(memory_config(&memory, "%d{ISO8601} %m"));
        assert_eq!(builder.recycler_factory().kind(), RecyclerKind::Dummy);
        let pipeline = builder.build().unwrap();

        let layout_kind = |pipeline: &Pipeline| {
            let config = pipeline.configuration();
            config.appender("memory").map(|b| b.layout.recycler().kind())
        };
        assert_eq!(layout_kind(&pipeline), Some(RecyclerKind::Dummy));

        // Not started: rendering happens on this thread
        let instant = crate::core::instant::Instant::new(1_736_332_245, 0);
        for text in ["one", "two"] {
            pipeline.emit(EventRecord::new("app", LogLevel::Info, text).with_instant(instant));
        }
        assert_eq!(
            memory.messages(),
            vec!["2025-01-08T10:30:45.000Z one", "2025-01-08T10:30:45.000Z two"]
        );
        assert_eq!(crate::core::thread_slot::values_on_current_thread(), 0);

        let replacement = Arc::new(InMemoryAppender::new("memory"));
        pipeline.reconfigure(memory_config(&replacement, "%d %m")).unwrap();
        assert_eq!(layout_kind(&pipeline), Some(RecyclerKind::Dummy));
    }

    #[test]
    fn test_pattern_layouts_follow_recycler_setting() {
        let memory = Arc::new(InMemoryAppender::new("memory"));
        let pipeline = Pipeline::builder()
            .recycler(RecyclerKind::ThreadLocal, 4)
            .status_logger(quiet_status())
            .configuration(memory_config(&memory, "%m"))
            .build()
            .unwrap();
        let config = pipeline.configuration();
        let layout = &config.appender("memory").unwrap().layout;
        assert_eq!(layout.recycler(), RecyclerFactory::new(RecyclerKind::ThreadLocal, 4));
    }

    #[test]
    fn test_flush_waits_for_consumer() {
        let memory = Arc::new(InMemoryAppender::new("memory"));
        let pipeline = Pipeline::builder()
            .status_logger(quiet_status())
            .configuration(memory_config(&memory, "%m"))
            .start()
            .unwrap();

        for i in 0..100 {
            pipeline.emit(EventRecord::new("app", LogLevel::Info, i.to_string()));
        }
        assert!(pipeline.flush(Duration::from_secs(5)));
        assert_eq!(memory.len(), 100);
        assert!(memory.flush_count() >= 1);
    }

    #[test]
    fn test_start_twice_and_after_stop() {
        let pipeline = Pipeline::builder().status_logger(quiet_status()).build().unwrap();
        pipeline.start().unwrap();
        pipeline.start().unwrap();
        assert!(pipeline.stop(Duration::from_secs(5)));
        assert!(matches!(pipeline.start(), Err(PipelineError::PipelineStopped)));
    }

    #[test]
    fn test_invalid_settings_fail_build() {
        let err = Pipeline::builder().ring_buffer_size(0).build().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_unknown_policy_falls_back() {
        let status = quiet_status();
        let pipeline = Pipeline::builder()
            .status_logger(Arc::clone(&status))
            .queue_full_policy("Mystery")
            .build()
            .unwrap();
        assert_eq!(pipeline.policy_name(), "Default");
        assert_eq!(status.entries_containing("Mystery").len(), 1);
    }
}
