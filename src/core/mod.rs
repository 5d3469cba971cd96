//! Pipeline engine: events, transport, policies and lifecycle

pub mod appender;
pub mod configuration;
pub mod error;
pub mod filter;
pub mod instant;
pub mod log_context;
pub mod log_event;
pub mod log_level;
pub mod logger;
pub mod metrics;
pub mod pipeline;
pub mod queue_full_policy;
pub mod recycler;
pub mod registry;
pub mod reliability;
pub mod ring;
pub mod settings;
pub mod status;
pub mod thread_slot;
pub mod throwable;
pub mod timestamp;

pub use appender::AppenderSink;
pub use configuration::{AppenderBinding, AppenderRef, Configuration, ConfigurationBuilder, Route};
pub use error::{PipelineError, Result};
pub use filter::{
    Filter, FilterChain, FilterResult, LevelRangeFilter, MarkerFilter, RegexFilter,
    ThresholdFilter,
};
pub use instant::{Clock, FixedClock, Instant, Precision, SystemClock};
pub use log_context::{ContextGuard, ContextMap, ThreadContext};
pub use log_event::{EventRecord, Marker, Message, SourceLocation};
pub use log_level::LogLevel;
pub use logger::{EventBuilder, Logger};
pub use metrics::PipelineMetrics;
pub use pipeline::{
    EmitOutcome, Pipeline, PipelineBuilder, PipelineContext, PipelineState, CONSUMER_THREAD_NAME,
};
pub use queue_full_policy::{
    BlockingQueueFullPolicy, DefaultQueueFullPolicy, DiscardingQueueFullPolicy, EnqueueAttempt,
    QueueFullAction, QueueFullPolicy,
};
pub use recycler::{
    byte_recycler, string_recycler, Recycled, Recycler, RecyclerFactory, RecyclerKind,
};
pub use registry::{PolicyConstructor, PolicyContext, PolicyRegistry};
pub use reliability::{
    EventPermit, Generation, GenerationState, ReliabilityCoordinator, ReliabilityStrategy,
};
pub use ring::{EmitResult, RingTransport};
pub use settings::{
    AfterStopAction, EnvPropertySource, MapPropertySource, PipelineSettings, PropertySource,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use status::{RateLimiter, StatusEntry, StatusListener, StatusLogger, StderrStatusListener};
pub use throwable::{StackFrame, ThrowableProxy};
pub use timestamp::TimestampFormat;
