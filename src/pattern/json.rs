//! Structured JSON event converter

use super::Converter;
use crate::core::error::{PipelineError, Result};
use crate::core::log_context::ContextMap;
use crate::core::log_event::{EventRecord, Message, SourceLocation};
use crate::core::recycler::{byte_recycler, string_recycler, Recycler, RecyclerFactory};
use crate::core::throwable::ThrowableProxy;
use crate::core::timestamp::TimestampFormat;
use serde::{Serialize, Serializer};

const TIMESTAMP_CAPACITY: usize = 40;
const JSON_CAPACITY: usize = 512;
const JSON_MAX_RETAINED: usize = 16 * 1024;

struct LazyMessage<'a>(&'a Message);

impl Serialize for LazyMessage<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self.0)
    }
}

fn no_context(context: &&ContextMap) -> bool {
    context.is_empty()
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    timestamp: &'a str,
    level: &'static str,
    logger: &'a str,
    thread: Option<&'a str>,
    thread_id: u64,
    message: LazyMessage<'a>,
    #[serde(skip_serializing_if = "no_context")]
    context: &'a ContextMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    marker: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thrown: Option<&'a ThrowableProxy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a SourceLocation>,
    sequence: u64,
}

/// Writes the whole event as a single-line JSON object
#[derive(Debug)]
pub struct JsonEventConverter {
    timestamp: TimestampFormat,
    stamps: Recycler<String>,
    bytes: Recycler<Vec<u8>>,
}

impl JsonEventConverter {
    pub fn new(timestamp: TimestampFormat) -> Self {
        Self::with_recycler(timestamp, &RecyclerFactory::default())
    }

    pub fn with_recycler(timestamp: TimestampFormat, recycler: &RecyclerFactory) -> Self {
        Self {
            timestamp,
            stamps: string_recycler(recycler, TIMESTAMP_CAPACITY, TIMESTAMP_CAPACITY * 2),
            bytes: byte_recycler(recycler, JSON_CAPACITY, JSON_MAX_RETAINED),
        }
    }
}

impl Converter for JsonEventConverter {
    fn name(&self) -> &str {
        "json"
    }

    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()> {
        let mut stamp = self.stamps.scoped();
        self.timestamp.format_into(&record.instant, &mut stamp)?;

        let event = JsonEvent {
            timestamp: stamp.as_str(),
            level: record.level.to_str(),
            logger: &*record.logger_name,
            thread: record.thread_name.as_deref(),
            thread_id: record.thread_id,
            message: LazyMessage(&record.message),
            context: &record.context,
            marker: record.marker.as_ref().map(|m| m.name()),
            thrown: record.thrown.as_ref(),
            location: record.location.as_ref(),
            sequence: record.sequence,
        };

        let mut bytes = self.bytes.scoped();
        serde_json::to_writer(&mut *bytes, &event)?;
        let text = std::str::from_utf8(bytes.as_slice())
            .map_err(|e| PipelineError::format("json", e.to_string()))?;
        buf.push_str(text);
        Ok(())
    }
}
