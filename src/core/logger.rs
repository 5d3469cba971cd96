//! Named logger handles

use super::log_context::{ContextMap, ThreadContext};
use super::log_event::{EventRecord, Marker, Message};
use super::log_level::LogLevel;
use super::pipeline::{EmitOutcome, Shared};
use super::throwable::ThrowableProxy;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Cheap, cloneable handle that builds events and emits them into its pipeline
///
/// Events pick up the calling thread's fields from the pipeline's
/// [`ThreadContext`]; fields set explicitly on an event win over them.
///
/// # Example
///
/// ```
/// use rust_log_pipeline::prelude::*;
/// use std::sync::Arc;
///
/// let memory = Arc::new(InMemoryAppender::new("memory"));
/// let pipeline = Pipeline::builder()
///     .configuration(
///         Configuration::builder("app")
///             .root_ref("memory")
///             .sink(memory.clone(), FormatterChain::from_pattern("%p %m%X").unwrap())
///             .build(),
///     )
///     .build()
///     .unwrap();
///
/// let log = pipeline.logger("app");
/// let _request = pipeline.thread_context().scoped("request", "r-1");
/// log.at(LogLevel::Warn).field("user", "alice").log("slow");
///
/// assert_eq!(memory.messages(), vec!["WARN slow{request=r-1, user=alice}"]);
/// ```
#[derive(Clone)]
pub struct Logger {
    shared: Arc<Shared>,
    name: Arc<str>,
    capture_location: bool,
}

impl Logger {
    pub(crate) fn new(shared: Arc<Shared>, name: &str) -> Self {
        Self {
            shared,
            name: Arc::from(name),
            capture_location: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach file/line/module to events logged through the macros
    #[must_use = "builder methods return a new value"]
    pub fn with_location_capture(mut self, enabled: bool) -> Self {
        self.capture_location = enabled;
        self
    }

    pub fn captures_location(&self) -> bool {
        self.capture_location
    }

    /// Whether the active configuration lets `level` through for this logger
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.shared.is_enabled(&self.name, level)
    }

    pub fn thread_context(&self) -> &ThreadContext {
        self.shared.context().thread_context()
    }

    fn record(&self, level: LogLevel, message: Message) -> EventRecord {
        let context = self.shared.context();
        EventRecord::new(Arc::clone(&self.name), level, message)
            .with_instant(context.clock().now())
            .with_context(context.thread_context().snapshot())
    }

    fn filtered(&self) -> EmitOutcome {
        self.shared.record_filtered();
        EmitOutcome::Filtered
    }

    pub fn log(&self, level: LogLevel, message: impl Into<Message>) -> EmitOutcome {
        if !self.is_enabled(level) {
            return self.filtered();
        }
        self.shared.emit(self.record(level, message.into()))
    }

    /// Used by the logging macros; the location is kept only when capture is on
    pub fn log_located(
        &self,
        level: LogLevel,
        message: impl Into<Message>,
        file: &str,
        line: u32,
        module_path: &str,
    ) -> EmitOutcome {
        if !self.is_enabled(level) {
            return self.filtered();
        }
        let mut record = self.record(level, message.into());
        if self.capture_location {
            record = record.with_location(file, line, module_path);
        }
        self.shared.emit(record)
    }

    /// Log a `{}` template; arguments are only rendered when the level is enabled
    pub fn log_template(
        &self,
        level: LogLevel,
        template: &str,
        args: &[&dyn fmt::Display],
    ) -> EmitOutcome {
        if !self.is_enabled(level) {
            return self.filtered();
        }
        let args = args.iter().map(|arg| arg.to_string()).collect();
        self.shared.emit(self.record(level, Message::template(template, args)))
    }

    /// Log with `err` and its source chain attached
    pub fn log_error<E: Error + 'static>(
        &self,
        level: LogLevel,
        message: impl Into<Message>,
        err: &E,
    ) -> EmitOutcome {
        self.at(level).error(err).log(message)
    }

    pub fn trace(&self, message: impl Into<Message>) -> EmitOutcome {
        self.log(LogLevel::Trace, message)
    }

    pub fn debug(&self, message: impl Into<Message>) -> EmitOutcome {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: impl Into<Message>) -> EmitOutcome {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl Into<Message>) -> EmitOutcome {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: impl Into<Message>) -> EmitOutcome {
        self.log(LogLevel::Error, message)
    }

    pub fn fatal(&self, message: impl Into<Message>) -> EmitOutcome {
        self.log(LogLevel::Fatal, message)
    }

    /// Start an event carrying a marker, a throwable, fields or a location
    pub fn at(&self, level: LogLevel) -> EventBuilder<'_> {
        EventBuilder {
            logger: self,
            level,
            fields: ContextMap::new(),
            marker: None,
            thrown: None,
            location: None,
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("capture_location", &self.capture_location)
            .finish()
    }
}

/// One event under construction, see [`Logger::at`]
#[must_use = "an event is only emitted by calling `log`"]
pub struct EventBuilder<'a> {
    logger: &'a Logger,
    level: LogLevel,
    fields: ContextMap,
    marker: Option<Marker>,
    thrown: Option<ThrowableProxy>,
    location: Option<(&'static str, u32, &'static str)>,
}

impl EventBuilder<'_> {
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key, value);
        self
    }

    pub fn marker(mut self, marker: Marker) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn throwable(mut self, thrown: ThrowableProxy) -> Self {
        self.thrown = Some(thrown);
        self
    }

    pub fn error<E: Error + 'static>(self, err: &E) -> Self {
        self.throwable(ThrowableProxy::from_error(err))
    }

    pub fn location(mut self, file: &'static str, line: u32, module_path: &'static str) -> Self {
        self.location = Some((file, line, module_path));
        self
    }

    pub fn log(self, message: impl Into<Message>) -> EmitOutcome {
        let logger = self.logger;
        if !logger.is_enabled(self.level) {
            return logger.filtered();
        }

        let mut record = logger.record(self.level, message.into());
        let mut fields = self.fields;
        fields.merge_missing(&record.context);
        record.context = fields;
        record.marker = self.marker;
        record.thrown = self.thrown;
        if let Some((file, line, module_path)) = self.location {
            record = record.with_location(file, line, module_path);
        }
        logger.shared.emit(record)
    }
}
