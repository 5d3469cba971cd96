//! Formatter chains
//!
//! A [`FormatterChain`] is an ordered list of converters that append one
//! piece of an event each into a caller-supplied buffer. A converter that
//! fails or panics never aborts the chain: its partial output is rolled back,
//! a `<name:error>` placeholder is written instead and the failure is
//! reported the first time it happens.

mod context_map;
mod converters;
mod date;
mod json;
mod parser;
mod replace;
mod throwable;

pub use context_map::ContextMapConverter;
pub use converters::{
    LevelConverter, LineSeparatorConverter, LiteralConverter, LocationConverter, LoggerConverter,
    MarkerConverter, MessageConverter, SequenceConverter, ThreadIdConverter, ThreadNameConverter,
};
pub use date::DateConverter;
pub use json::JsonEventConverter;
pub use parser::parse_pattern;
pub use replace::RegexReplaceConverter;
pub use throwable::{ThrowableConverter, ThrowableStyle};

use crate::core::error::Result;
use crate::core::log_event::EventRecord;
use crate::core::recycler::RecyclerFactory;
use crate::core::timestamp::TimestampFormat;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One step of a formatter chain
pub trait Converter: Send + Sync + fmt::Debug {
    /// Short name used in placeholders and diagnostics
    fn name(&self) -> &str;

    /// Append this converter's output for `record`
    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()>;
}

/// A converter failure observed while rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatFailure {
    pub converter: String,
    pub message: String,
    /// True only for the first failure of this converter in this chain
    pub first_report: bool,
}

#[derive(Debug)]
struct Slot {
    converter: Box<dyn Converter>,
    reported: AtomicBool,
}

type Rebuild = Arc<dyn Fn(&RecyclerFactory) -> Result<FormatterChain> + Send + Sync>;

/// Ordered converters rendering an event into text
///
/// Chains built from a pattern or one of the stock layouts remember how to
/// rebuild themselves, so a pipeline can move their scratch pools onto its
/// own recycler strategy with [`FormatterChain::rebind`].
pub struct FormatterChain {
    slots: Vec<Slot>,
    recycler: RecyclerFactory,
    rebuild: Option<Rebuild>,
}

impl FormatterChain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    /// Build from a pattern such as `%d [%t] %-5p %c{1} - %m%n`
    pub fn from_pattern(pattern: &str) -> Result<Self> {
        Self::from_pattern_with(pattern, &RecyclerFactory::default())
    }

    pub fn from_pattern_with(pattern: &str, recycler: &RecyclerFactory) -> Result<Self> {
        let converters = parse_pattern(pattern, recycler)?;
        let source = pattern.to_string();
        Ok(Self::from_converters(converters).rebuilt_by(*recycler, move |recycler| {
            Self::from_pattern_with(&source, recycler)
        }))
    }

    pub fn from_converters(converters: Vec<Box<dyn Converter>>) -> Self {
        Self {
            slots: converters
                .into_iter()
                .map(|converter| Slot {
                    converter,
                    reported: AtomicBool::new(false),
                })
                .collect(),
            recycler: RecyclerFactory::default(),
            rebuild: None,
        }
    }

    fn rebuilt_by<F>(mut self, recycler: RecyclerFactory, rebuild: F) -> Self
    where
        F: Fn(&RecyclerFactory) -> Result<FormatterChain> + Send + Sync + 'static,
    {
        self.recycler = recycler;
        self.rebuild = Some(Arc::new(rebuild));
        self
    }

    /// `[timestamp] [LEVEL] thread - message key=value`
    pub fn default_text() -> Self {
        Self::default_text_with(&RecyclerFactory::default())
    }

    pub fn default_text_with(recycler: &RecyclerFactory) -> Self {
        Self::builder()
            .recycler(*recycler)
            .literal("[")
            .date(TimestampFormat::Iso8601)
            .literal("] [")
            .level_padded(5)
            .literal("] ")
            .thread_name()
            .literal(" - ")
            .message()
            .converter(ContextMapConverter::fields())
            .converter(ThrowableConverter::new(ThrowableStyle::Standard, None).on_new_line())
            .build()
            .rebuilt_by(*recycler, |recycler| Ok(Self::default_text_with(recycler)))
    }

    /// One JSON object per event
    pub fn json() -> Self {
        Self::json_with(&RecyclerFactory::default())
    }

    pub fn json_with(recycler: &RecyclerFactory) -> Self {
        Self::builder()
            .recycler(*recycler)
            .json(TimestampFormat::Iso8601)
            .build()
            .rebuilt_by(*recycler, |recycler| Ok(Self::json_with(recycler)))
    }

    /// Recycler strategy the converters' scratch state was built with
    pub fn recycler(&self) -> RecyclerFactory {
        self.recycler
    }

    /// The same layout with its scratch state pooled by `recycler`
    ///
    /// `None` when the chain already uses `recycler` or was assembled from
    /// individual converters and cannot be rebuilt.
    pub fn rebind(&self, recycler: &RecyclerFactory) -> Result<Option<FormatterChain>> {
        match &self.rebuild {
            Some(rebuild) if self.recycler != *recycler => rebuild(recycler).map(Some),
            _ => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn converter_names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.converter.name()).collect()
    }

    /// Append the rendered event to `buf`
    ///
    /// Returns the converters that failed; the vector is empty (and
    /// unallocated) on the happy path.
    pub fn render(&self, record: &EventRecord, buf: &mut String) -> Vec<FormatFailure> {
        let mut failures = Vec::new();
        for slot in &self.slots {
            let mark = buf.len();
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| slot.converter.format(record, buf)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };

            buf.truncate(mark);
            buf.push('<');
            buf.push_str(slot.converter.name());
            buf.push_str(":error>");

            failures.push(FormatFailure {
                converter: slot.converter.name().to_string(),
                message,
                first_report: !slot.reported.swap(true, Ordering::Relaxed),
            });
        }
        failures
    }

    /// Render into a fresh `String`, ignoring failures
    pub fn render_to_string(&self, record: &EventRecord) -> String {
        let mut buf = String::with_capacity(128);
        self.render(record, &mut buf);
        buf
    }
}

impl Default for FormatterChain {
    fn default() -> Self {
        Self::default_text()
    }
}

impl fmt::Debug for FormatterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatterChain")
            .field("converters", &self.converter_names())
            .field("recycler", &self.recycler)
            .field("rebuildable", &self.rebuild.is_some())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Fluent construction of a [`FormatterChain`]
///
/// # Example
///
/// ```
/// use rust_log_pipeline::pattern::FormatterChain;
///
/// let chain = FormatterChain::builder()
///     .level()
///     .literal(" ")
///     .logger(Some(1))
///     .literal(": ")
///     .message()
///     .build();
/// assert_eq!(chain.len(), 5);
/// ```
#[must_use = "builder methods return a new value"]
pub struct ChainBuilder {
    converters: Vec<Box<dyn Converter>>,
    recycler: RecyclerFactory,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self {
            converters: Vec::new(),
            recycler: RecyclerFactory::default(),
        }
    }

    /// Pool strategy for converter scratch state added after this call
    pub fn recycler(mut self, recycler: RecyclerFactory) -> Self {
        self.recycler = recycler;
        self
    }

    pub fn converter(mut self, converter: impl Converter + 'static) -> Self {
        self.converters.push(Box::new(converter));
        self
    }

    pub fn literal(self, text: &str) -> Self {
        self.converter(LiteralConverter::new(text))
    }

    pub fn date(self, format: TimestampFormat) -> Self {
        let converter = DateConverter::new(format, &self.recycler);
        self.converter(converter)
    }

    pub fn level(self) -> Self {
        self.converter(LevelConverter::new())
    }

    pub fn level_padded(self, width: usize) -> Self {
        self.converter(LevelConverter::new().padded(width))
    }

    /// Logger name, keeping only the right-most `segments` when given
    pub fn logger(self, segments: Option<usize>) -> Self {
        self.converter(LoggerConverter::new(segments))
    }

    pub fn message(self) -> Self {
        self.converter(MessageConverter)
    }

    pub fn thread_name(self) -> Self {
        self.converter(ThreadNameConverter)
    }

    pub fn thread_id(self) -> Self {
        self.converter(ThreadIdConverter)
    }

    pub fn context_map(self) -> Self {
        self.converter(ContextMapConverter::all())
    }

    pub fn context_key(self, key: &str) -> Self {
        self.converter(ContextMapConverter::keys(&[key]))
    }

    pub fn marker(self) -> Self {
        self.converter(MarkerConverter)
    }

    pub fn location(self) -> Self {
        self.converter(LocationConverter)
    }

    pub fn sequence(self) -> Self {
        self.converter(SequenceConverter)
    }

    pub fn newline(self) -> Self {
        self.converter(LineSeparatorConverter)
    }

    pub fn throwable(self, style: ThrowableStyle, max_lines: Option<usize>) -> Self {
        self.converter(ThrowableConverter::new(style, max_lines))
    }

    /// Regex replacement over the output of `inner`
    pub fn replace(self, inner: FormatterChain, regex: &str, replacement: &str) -> Result<Self> {
        let converter = RegexReplaceConverter::new(inner, regex, replacement, &self.recycler)?;
        Ok(self.converter(converter))
    }

    pub fn json(self, timestamp: TimestampFormat) -> Self {
        let converter = JsonEventConverter::with_recycler(timestamp, &self.recycler);
        self.converter(converter)
    }

    pub fn build(self) -> FormatterChain {
        let mut chain = FormatterChain::from_converters(self.converters);
        chain.recycler = self.recycler;
        chain
    }

    pub fn build_shared(self) -> Arc<FormatterChain> {
        Arc::new(self.build())
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}
