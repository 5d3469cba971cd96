//! Regex replacement over a nested chain

use super::{Converter, FormatterChain};
use crate::core::error::{PipelineError, Result};
use crate::core::log_event::EventRecord;
use crate::core::recycler::{string_recycler, Recycler, RecyclerFactory};
use regex::Regex;

const SCRATCH_CAPACITY: usize = 256;
const SCRATCH_MAX_RETAINED: usize = 4096;

/// Renders `inner` into a pooled scratch buffer, then appends it with every
/// match of `regex` replaced
#[derive(Debug)]
pub struct RegexReplaceConverter {
    inner: FormatterChain,
    regex: Regex,
    replacement: String,
    scratch: Recycler<String>,
}

impl RegexReplaceConverter {
    pub fn new(
        inner: FormatterChain,
        regex: &str,
        replacement: &str,
        recycler: &RecyclerFactory,
    ) -> Result<Self> {
        let regex = Regex::new(regex).map_err(|e| PipelineError::config("replace", e.to_string()))?;
        Ok(Self {
            inner,
            regex,
            replacement: replacement.to_string(),
            scratch: string_recycler(recycler, SCRATCH_CAPACITY, SCRATCH_MAX_RETAINED),
        })
    }
}

impl Converter for RegexReplaceConverter {
    fn name(&self) -> &str {
        "replace"
    }

    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()> {
        let mut scratch = self.scratch.scoped();
        // Inner failures already left placeholders in the scratch output
        self.inner.render(record, &mut scratch);
        let replaced = self.regex.replace_all(&scratch, self.replacement.as_str());
        buf.push_str(&replaced);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_level::LogLevel;

    #[test]
    fn test_masks_digits() {
        let inner = FormatterChain::builder().message().build();
        let converter =
            RegexReplaceConverter::new(inner, r"\d{4}", "****", &RecyclerFactory::default())
                .unwrap();

        let record = EventRecord::new("pay", LogLevel::Info, "card 1234 5678 ok");
        let mut buf = String::from("> ");
        converter.format(&record, &mut buf).unwrap();
        assert_eq!(buf, "> card **** **** ok");
    }

    #[test]
    fn test_capture_groups() {
        let inner = FormatterChain::builder().logger(None).build();
        let recycler = RecyclerFactory::default();
        let converter =
            RegexReplaceConverter::new(inner, r"^(\w+)\.(\w+)$", "$2@$1", &recycler).unwrap();

        let record = EventRecord::new("app.db", LogLevel::Info, "x");
        let mut buf = String::new();
        converter.format(&record, &mut buf).unwrap();
        assert_eq!(buf, "db@app");
    }

    #[test]
    fn test_scratch_is_reused_clean() {
        let inner = FormatterChain::builder().message().build();
        let converter =
            RegexReplaceConverter::new(inner, "a", "b", &RecyclerFactory::default()).unwrap();

        let mut first = String::new();
        converter
            .format(&EventRecord::new("x", LogLevel::Info, "aaaa long message"), &mut first)
            .unwrap();
        let mut second = String::new();
        converter
            .format(&EventRecord::new("x", LogLevel::Info, "a"), &mut second)
            .unwrap();
        assert_eq!(second, "b");
    }

    #[test]
    fn test_invalid_regex() {
        let inner = FormatterChain::builder().message().build();
        assert!(RegexReplaceConverter::new(inner, "(", "", &RecyclerFactory::default()).is_err());
    }
}
