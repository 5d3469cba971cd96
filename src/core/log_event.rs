//! Event record structure

use super::instant::Instant;
use super::log_context::ContextMap;
use super::log_level::LogLevel;
use super::throwable::ThrowableProxy;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

// Thread-local caches for thread information to avoid repeated allocations
thread_local! {
    static THREAD_INFO_CACHE: RefCell<Option<(u64, Option<Arc<str>>)>> =
        const { RefCell::new(None) };
}

/// Numeric id and name of the calling thread, computed once per thread
pub fn current_thread_info() -> (u64, Option<Arc<str>>) {
    THREAD_INFO_CACHE
        .try_with(|cache| {
            cache
                .borrow_mut()
                .get_or_insert_with(|| {
                    (
                        NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
                        std::thread::current().name().map(Arc::from),
                    )
                })
                .clone()
        })
        .unwrap_or((0, None))
}

/// Categorical tag attached to an event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Marker {
    name: Arc<str>,
    parents: Vec<Marker>,
}

impl Marker {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            parents: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: Marker) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this marker is `name` or descends from it
    pub fn is_instance_of(&self, name: &str) -> bool {
        &*self.name == name || self.parents.iter().any(|p| p.is_instance_of(name))
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Where the log call was made
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub module_path: String,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}:{})", self.module_path, self.file, self.line)
    }
}

/// Event message, rendered lazily
///
/// A template keeps the raw `{}` pattern and its arguments so formatting
/// happens on the consumer thread, straight into a pooled buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Text(String),
    Template { template: String, args: Vec<String> },
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Message::Text(text.into())
    }

    pub fn template(template: impl Into<String>, args: Vec<String>) -> Self {
        Message::Template {
            template: template.into(),
            args,
        }
    }

    /// Raw text before argument substitution
    pub fn raw(&self) -> &str {
        match self {
            Message::Text(text) => text,
            Message::Template { template, .. } => template,
        }
    }

    /// Append the rendered message to `buf`
    ///
    /// `{}` placeholders consume arguments in order; `\{}` is a literal `{}`;
    /// placeholders without an argument are kept verbatim.
    pub fn format_into(&self, buf: &mut String) {
        // Writing to a String cannot fail
        let _ = self.write_to(buf);
    }

    /// Stream the rendered message into any `fmt::Write`
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> fmt::Result {
        match self {
            Message::Text(text) => out.write_str(text),
            Message::Template { template, args } => {
                let mut args = args.iter();
                let mut rest = template.as_str();
                while let Some(pos) = rest.find("{}") {
                    if rest[..pos].ends_with('\\') {
                        out.write_str(&rest[..pos - 1])?;
                        out.write_str("{}")?;
                    } else {
                        out.write_str(&rest[..pos])?;
                        out.write_str(args.next().map(String::as_str).unwrap_or("{}"))?;
                    }
                    rest = &rest[pos + 2..];
                }
                out.write_str(rest)
            }
        }
    }

    pub fn formatted(&self) -> String {
        let mut buf = String::with_capacity(self.raw().len());
        self.format_into(&mut buf);
        buf
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_to(f)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

/// One log call
///
/// Records are moved into the ring by value; the consumer owns them
/// exclusively afterwards, so nothing can mutate a published record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub logger_name: Arc<str>,
    pub level: LogLevel,
    pub instant: Instant,
    pub thread_id: u64,
    pub thread_name: Option<Arc<str>>,
    pub message: Message,
    #[serde(skip_serializing_if = "ContextMap::is_empty", default)]
    pub context: ContextMap,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub marker: Option<Marker>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub thrown: Option<ThrowableProxy>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<SourceLocation>,
    /// Ring position plus one once queued; zero for records never queued
    #[serde(default)]
    pub sequence: u64,
    /// Configuration generation the record was admitted under
    #[serde(default)]
    pub generation: u64,
}

impl EventRecord {
    pub fn new(
        logger_name: impl Into<Arc<str>>,
        level: LogLevel,
        message: impl Into<Message>,
    ) -> Self {
        let (thread_id, thread_name) = current_thread_info();
        Self {
            logger_name: logger_name.into(),
            level,
            instant: Instant::from(std::time::SystemTime::now()),
            thread_id,
            thread_name,
            message: message.into(),
            context: ContextMap::new(),
            marker: None,
            thrown: None,
            location: None,
            sequence: 0,
            generation: 0,
        }
    }

    #[must_use]
    pub fn with_instant(mut self, instant: Instant) -> Self {
        self.instant = instant;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: ContextMap) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.marker = Some(marker);
        self
    }

    #[must_use]
    pub fn with_thrown(mut self, thrown: ThrowableProxy) -> Self {
        self.thrown = Some(thrown);
        self
    }

    #[must_use]
    pub fn with_location(mut self, file: &str, line: u32, module_path: &str) -> Self {
        self.location = Some(SourceLocation {
            file: file.to_string(),
            line,
            module_path: module_path.to_string(),
        });
        self
    }

    #[must_use]
    pub fn with_thread(mut self, thread_id: u64, thread_name: Option<&str>) -> Self {
        self.thread_id = thread_id;
        self.thread_name = thread_name.map(Arc::from);
        self
    }

    /// Thread name, or `thread-<id>` when the thread is unnamed
    pub fn write_thread_name(&self, buf: &mut String) {
        match &self.thread_name {
            Some(name) => buf.push_str(name),
            None => {
                let _ = write!(buf, "thread-{}", self.thread_id);
            }
        }
    }
}
