//! Date converter with a per-thread render cache

use super::Converter;
use crate::core::error::{PipelineError, Result};
use crate::core::instant::{Instant, Precision};
use crate::core::log_event::EventRecord;
use crate::core::recycler::{Recycler, RecyclerFactory};
use crate::core::timestamp::TimestampFormat;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct DateCache {
    last: Option<Instant>,
    rendered: String,
}

/// Renders the event instant
///
/// Text formats keep the previous instant and its rendering per thread and
/// only re-render when the new instant differs at the format's precision.
/// Numeric formats are written directly.
#[derive(Debug)]
pub struct DateConverter {
    format: TimestampFormat,
    precision: Precision,
    cache: Recycler<DateCache>,
    renders: AtomicU64,
}

impl DateConverter {
    pub fn new(format: TimestampFormat, recycler: &RecyclerFactory) -> Self {
        let precision = format.precision();
        Self {
            format,
            precision,
            // The cache must survive release, so the cleaner keeps it
            cache: recycler.create(DateCache::default, |_: &mut DateCache| {}),
            renders: AtomicU64::new(0),
        }
    }

    pub fn timestamp_format(&self) -> &TimestampFormat {
        &self.format
    }

    /// Number of times the timestamp was actually rendered
    pub fn render_count(&self) -> u64 {
        self.renders.load(Ordering::Relaxed)
    }

    fn render_into(&self, instant: &Instant, buf: &mut String) -> Result<()> {
        self.renders.fetch_add(1, Ordering::Relaxed);
        self.format.format_into(instant, buf).map_err(|_| {
            PipelineError::format("date", format!("cannot render timestamp with {:?}", self.format))
        })
    }
}

impl Converter for DateConverter {
    fn name(&self) -> &str {
        "date"
    }

    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()> {
        if !self.format.benefits_from_cache() {
            return self.render_into(&record.instant, buf);
        }

        let mut cache = self.cache.scoped();
        let fresh = cache
            .last
            .is_some_and(|last| last.is_equivalent(&record.instant, self.precision));
        if !fresh {
            cache.last = None;
            cache.rendered.clear();
            self.render_into(&record.instant, &mut cache.rendered)?;
            cache.last = Some(record.instant);
        }
        buf.push_str(&cache.rendered);
        Ok(())
    }
}
