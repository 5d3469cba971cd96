//! # Rust Log Pipeline
//!
//! An asynchronous structured logging pipeline that keeps steady-state
//! logging free of per-event allocation and lets its configuration be
//! swapped while events are in flight.
//!
//! ## Features
//!
//! - **Ring transport**: bounded multi-producer ring feeding one consumer thread
//! - **Queue-full policies**: bounded retry with synchronous fallback, discard
//!   by level, or block; selectable by name through a registry
//! - **Live reconfiguration**: in-flight events finish against the
//!   configuration they were admitted under
//! - **Pattern layouts**: converter chains with cached dates, throwable
//!   chains, regex replacement and JSON output
//! - **Self-diagnostics**: a synchronous status channel that reports drops
//!   and failures without re-entering the pipeline

pub mod appenders;
pub mod core;
pub mod macros;
pub mod pattern;

pub mod prelude {
    pub use crate::appenders::{InMemoryAppender, WriterAppender};
    pub use crate::core::{
        AfterStopAction, AppenderSink, Configuration, ContextMap, EmitOutcome, EventRecord,
        Filter, FilterChain, FilterResult, LevelRangeFilter, LogLevel, Logger, Marker,
        MarkerFilter, Message, Pipeline, PipelineBuilder, PipelineError, PipelineMetrics,
        PipelineSettings, QueueFullPolicy, RecyclerKind, RegexFilter, ReliabilityStrategy,
        Result, Route, StatusLogger, ThresholdFilter, ThrowableProxy, TimestampFormat,
        DEFAULT_SHUTDOWN_TIMEOUT,
    };
    pub use crate::pattern::FormatterChain;
}

pub use crate::appenders::{InMemoryAppender, WriterAppender};
pub use crate::core::{
    AfterStopAction, AppenderSink, Configuration, ContextMap, EmitOutcome, EventRecord, LogLevel,
    Logger, Marker, Message, Pipeline, PipelineBuilder, PipelineError, PipelineMetrics,
    PipelineSettings, ReliabilityStrategy, Result, Route, StatusLogger, ThrowableProxy,
    TimestampFormat, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use crate::pattern::FormatterChain;
