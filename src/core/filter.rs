//! Event filters
//!
//! A filter answers `Accept`, `Deny` or `Neutral`. Chains consult their
//! filters in order and stop at the first non-neutral answer; a chain that
//! ends neutral lets the event through.

use super::error::{PipelineError, Result};
use super::log_event::EventRecord;
use super::log_level::LogLevel;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterResult {
    Accept,
    Deny,
    Neutral,
}

impl FilterResult {
    /// Whether the event passes when this is the final answer
    #[inline]
    pub fn passes(self) -> bool {
        self != FilterResult::Deny
    }
}

impl std::str::FromStr for FilterResult {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "ACCEPT" => Ok(FilterResult::Accept),
            "DENY" => Ok(FilterResult::Deny),
            "NEUTRAL" => Ok(FilterResult::Neutral),
            _ => Err(PipelineError::config("filter", format!("Unknown filter result: {}", s))),
        }
    }
}

pub trait Filter: Send + Sync + fmt::Debug {
    fn filter(&self, record: &EventRecord) -> FilterResult;
}

/// Ordered filters, first non-neutral answer wins
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn push(&mut self, filter: Arc<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn decide(&self, record: &EventRecord) -> FilterResult {
        self.filters
            .iter()
            .map(|f| f.filter(record))
            .find(|result| *result != FilterResult::Neutral)
            .unwrap_or(FilterResult::Neutral)
    }
}

impl Filter for FilterChain {
    fn filter(&self, record: &EventRecord) -> FilterResult {
        self.decide(record)
    }
}

/// Matches levels in `min..=max`
#[derive(Debug, Clone)]
pub struct LevelRangeFilter {
    min: LogLevel,
    max: LogLevel,
    on_match: FilterResult,
    on_mismatch: FilterResult,
}

impl LevelRangeFilter {
    /// In range is neutral, out of range is denied
    pub fn new(min: LogLevel, max: LogLevel) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
            on_match: FilterResult::Neutral,
            on_mismatch: FilterResult::Deny,
        }
    }

    /// Only a lower bound
    pub fn at_least(min: LogLevel) -> Self {
        Self::new(min, LogLevel::Fatal)
    }

    #[must_use]
    pub fn on_match(mut self, result: FilterResult) -> Self {
        self.on_match = result;
        self
    }

    #[must_use]
    pub fn on_mismatch(mut self, result: FilterResult) -> Self {
        self.on_mismatch = result;
        self
    }
}

impl Filter for LevelRangeFilter {
    fn filter(&self, record: &EventRecord) -> FilterResult {
        if record.level >= self.min && record.level <= self.max {
            self.on_match
        } else {
            self.on_mismatch
        }
    }
}

/// Matches the whole message against a regular expression
#[derive(Debug, Clone)]
pub struct RegexFilter {
    regex: Regex,
    use_raw_message: bool,
    on_match: FilterResult,
    on_mismatch: FilterResult,
}

impl RegexFilter {
    /// Compile `pattern`
    ///
    /// `flags` takes `DOTALL`, `MULTILINE`, `CASE_INSENSITIVE` and `COMMENTS`.
    /// With `use_raw_message` a template is matched before argument
    /// substitution.
    pub fn new(pattern: &str, flags: &[&str], use_raw_message: bool) -> Result<Self> {
        let mut builder = RegexBuilder::new(&format!("^(?:{})$", pattern));
        for flag in flags {
            match flag.trim().to_uppercase().as_str() {
                "DOTALL" => builder.dot_matches_new_line(true),
                "MULTILINE" => builder.multi_line(true),
                "CASE_INSENSITIVE" => builder.case_insensitive(true),
                "COMMENTS" => builder.ignore_whitespace(true),
                other => {
                    return Err(PipelineError::config(
                        "RegexFilter",
                        format!("Unsupported regex flag: {}", other),
                    ))
                }
            };
        }
        let regex = builder
            .build()
            .map_err(|e| PipelineError::config("RegexFilter", e.to_string()))?;

        Ok(Self {
            regex,
            use_raw_message,
            on_match: FilterResult::Neutral,
            on_mismatch: FilterResult::Deny,
        })
    }

    #[must_use]
    pub fn on_match(mut self, result: FilterResult) -> Self {
        self.on_match = result;
        self
    }

    #[must_use]
    pub fn on_mismatch(mut self, result: FilterResult) -> Self {
        self.on_mismatch = result;
        self
    }

    fn decide(&self, text: &str) -> FilterResult {
        if self.regex.is_match(text) {
            self.on_match
        } else {
            self.on_mismatch
        }
    }
}

impl Filter for RegexFilter {
    fn filter(&self, record: &EventRecord) -> FilterResult {
        if record.message.raw().is_empty() {
            return FilterResult::Deny;
        }
        if self.use_raw_message {
            self.decide(record.message.raw())
        } else {
            self.decide(&record.message.formatted())
        }
    }
}

/// Matches events carrying a marker that is or descends from `name`
#[derive(Debug, Clone)]
pub struct MarkerFilter {
    name: String,
    on_match: FilterResult,
    on_mismatch: FilterResult,
}

impl MarkerFilter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_match: FilterResult::Neutral,
            on_mismatch: FilterResult::Deny,
        }
    }

    #[must_use]
    pub fn on_match(mut self, result: FilterResult) -> Self {
        self.on_match = result;
        self
    }

    #[must_use]
    pub fn on_mismatch(mut self, result: FilterResult) -> Self {
        self.on_mismatch = result;
        self
    }
}

impl Filter for MarkerFilter {
    fn filter(&self, record: &EventRecord) -> FilterResult {
        match &record.marker {
            Some(marker) if marker.is_instance_of(&self.name) => self.on_match,
            _ => self.on_mismatch,
        }
    }
}

/// Matches events at or above `level`
#[derive(Debug, Clone)]
pub struct ThresholdFilter {
    level: LogLevel,
    on_match: FilterResult,
    on_mismatch: FilterResult,
}

impl ThresholdFilter {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            on_match: FilterResult::Neutral,
            on_mismatch: FilterResult::Deny,
        }
    }

    #[must_use]
    pub fn on_match(mut self, result: FilterResult) -> Self {
        self.on_match = result;
        self
    }

    #[must_use]
    pub fn on_mismatch(mut self, result: FilterResult) -> Self {
        self.on_mismatch = result;
        self
    }
}

impl Filter for ThresholdFilter {
    fn filter(&self, record: &EventRecord) -> FilterResult {
        if record.level >= self.level {
            self.on_match
        } else {
            self.on_mismatch
        }
    }
}
