//! Pipeline knobs and the property sources they are read from

use super::error::{PipelineError, Result};
use super::log_level::LogLevel;
use super::queue_full_policy::DEFAULT_QUEUE_FULL_RETRIES;
use super::recycler::{RecyclerFactory, RecyclerKind};
use super::reliability::ReliabilityStrategy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_RING_BUFFER_SIZE: usize = 256 * 1024;
pub const DEFAULT_ENV_PREFIX: &str = "LOG_PIPELINE_";

/// Default shutdown timeout for draining the consumer (5 seconds)
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// What happens to events emitted once `stop()` has begun
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AfterStopAction {
    /// Dispatch on the calling thread against the last configuration
    #[default]
    Synchronous,
    /// Drop the event and count it
    Discard,
}

impl FromStr for AfterStopAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "synchronous" | "sync" => Ok(AfterStopAction::Synchronous),
            "discard" | "drop" => Ok(AfterStopAction::Discard),
            _ => Err(format!("Invalid after-stop action: '{}'", s)),
        }
    }
}

/// Every tunable of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Ring capacity, rounded up to a power of two
    pub ring_buffer_size: usize,
    /// Name looked up in the policy registry
    pub queue_full_policy: String,
    pub discard_threshold: LogLevel,
    pub queue_full_retries: u32,
    pub discard_report_interval: Duration,
    pub reliability_strategy: ReliabilityStrategy,
    /// Upper bound on waiting for a generation to drain, unbounded when `None`
    pub reconfigure_timeout: Option<Duration>,
    pub fail_on_reconfigure_timeout: bool,
    pub recycler: RecyclerKind,
    pub recycler_depth: usize,
    /// `false` forces the `Dummy` recycler
    pub enable_thread_locals: bool,
    pub initial_buffer_size: usize,
    /// Render buffers grown past this are shrunk back on release
    pub max_reusable_buffer_size: usize,
    pub shutdown_timeout: Duration,
    pub after_stop: AfterStopAction,
    pub status_level: LogLevel,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            ring_buffer_size: DEFAULT_RING_BUFFER_SIZE,
            queue_full_policy: "Default".to_string(),
            discard_threshold: LogLevel::Info,
            queue_full_retries: DEFAULT_QUEUE_FULL_RETRIES,
            discard_report_interval: Duration::from_secs(1),
            reliability_strategy: ReliabilityStrategy::AwaitCompletion,
            reconfigure_timeout: None,
            fail_on_reconfigure_timeout: false,
            recycler: RecyclerKind::QueueingThreadLocal,
            recycler_depth: 8,
            enable_thread_locals: true,
            initial_buffer_size: 128,
            max_reusable_buffer_size: 518,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            after_stop: AfterStopAction::Synchronous,
            status_level: LogLevel::Warn,
        }
    }
}

impl PipelineSettings {
    /// Read settings from a property source, keeping defaults for absent keys
    ///
    /// Durations use `_ms` keys, e.g. `shutdown_timeout_ms`.
    pub fn from_source(source: &dyn PropertySource) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(v) = parse(source, "ring_buffer_size")? {
            settings.ring_buffer_size = v;
        }
        if let Some(v) = source.get("queue_full_policy") {
            settings.queue_full_policy = v.trim().to_string();
        }
        if let Some(v) = parse(source, "discard_threshold")? {
            settings.discard_threshold = v;
        }
        if let Some(v) = parse(source, "queue_full_retries")? {
            settings.queue_full_retries = v;
        }
        if let Some(ms) = parse::<u64>(source, "discard_report_interval_ms")? {
            settings.discard_report_interval = Duration::from_millis(ms);
        }
        if let Some(v) = parse(source, "reliability_strategy")? {
            settings.reliability_strategy = v;
        }
        if let Some(ms) = parse::<u64>(source, "reconfigure_timeout_ms")? {
            settings.reconfigure_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(v) = parse(source, "fail_on_reconfigure_timeout")? {
            settings.fail_on_reconfigure_timeout = v;
        }
        if let Some(v) = parse(source, "recycler")? {
            settings.recycler = v;
        }
        if let Some(v) = parse(source, "recycler_depth")? {
            settings.recycler_depth = v;
        }
        if let Some(v) = parse(source, "enable_thread_locals")? {
            settings.enable_thread_locals = v;
        }
        if let Some(v) = parse(source, "initial_buffer_size")? {
            settings.initial_buffer_size = v;
        }
        if let Some(v) = parse(source, "max_reusable_buffer_size")? {
            settings.max_reusable_buffer_size = v;
        }
        if let Some(ms) = parse::<u64>(source, "shutdown_timeout_ms")? {
            settings.shutdown_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = parse(source, "after_stop")? {
            settings.after_stop = v;
        }
        if let Some(v) = parse(source, "status_level")? {
            settings.status_level = v;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Settings from `LOG_PIPELINE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_source(&EnvPropertySource::new())
    }

    pub fn validate(&self) -> Result<()> {
        if self.ring_buffer_size == 0 {
            return Err(PipelineError::config("ring_buffer_size", "must be at least 1"));
        }
        if self.max_reusable_buffer_size < self.initial_buffer_size {
            return Err(PipelineError::config(
                "max_reusable_buffer_size",
                format!(
                    "{} is smaller than initial_buffer_size {}",
                    self.max_reusable_buffer_size, self.initial_buffer_size
                ),
            ));
        }
        Ok(())
    }

    /// Effective ring capacity
    pub fn ring_capacity(&self) -> usize {
        self.ring_buffer_size
            .max(2)
            .checked_next_power_of_two()
            .unwrap_or(self.ring_buffer_size)
    }

    pub fn recycler_factory(&self) -> RecyclerFactory {
        let kind = if self.enable_thread_locals {
            self.recycler
        } else {
            RecyclerKind::Dummy
        };
        RecyclerFactory::new(kind, self.recycler_depth)
    }
}

fn parse<T>(source: &dyn PropertySource, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match source.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| PipelineError::config(key, format!("'{}': {}", raw, e))),
    }
}

/// Key/value lookup for settings; keys are lower snake case
pub trait PropertySource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Environment variables: `ring_buffer_size` is read from
/// `LOG_PIPELINE_RING_BUFFER_SIZE`
#[derive(Debug, Clone)]
pub struct EnvPropertySource {
    prefix: String,
}

impl EnvPropertySource {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_ENV_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn variable_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_ascii_uppercase())
    }
}

impl Default for EnvPropertySource {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertySource for EnvPropertySource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.variable_name(key)).ok()
    }
}

/// In-memory properties, handy for loaders and tests
#[derive(Debug, Clone, Default)]
pub struct MapPropertySource {
    values: HashMap<String, String>,
}

impl MapPropertySource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use = "builder methods return a new value"]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_ascii_lowercase(), value.into());
    }
}

impl PropertySource for MapPropertySource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(&key.to_ascii_lowercase()).cloned()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for MapPropertySource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut source = Self::new();
        for (k, v) in iter {
            source.insert(k.as_ref(), v);
        }
        source
    }
}
