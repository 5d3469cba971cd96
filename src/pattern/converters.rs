//! Field converters

use super::Converter;
use crate::core::error::Result;
use crate::core::log_event::EventRecord;
use std::fmt::Write;

#[derive(Debug, Clone)]
pub struct LiteralConverter {
    text: String,
}

impl LiteralConverter {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

impl Converter for LiteralConverter {
    fn name(&self) -> &str {
        "literal"
    }

    fn format(&self, _record: &EventRecord, buf: &mut String) -> Result<()> {
        buf.push_str(&self.text);
        Ok(())
    }
}

/// Level name with optional right padding and lowercase
#[derive(Debug, Clone, Default)]
pub struct LevelConverter {
    width: usize,
    lowercase: bool,
}

impl LevelConverter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn padded(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    #[must_use]
    pub fn lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }
}

impl Converter for LevelConverter {
    fn name(&self) -> &str {
        "level"
    }

    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()> {
        let text = if self.lowercase {
            record.level.to_lowercase_str()
        } else {
            record.level.to_str()
        };
        buf.push_str(text);
        for _ in text.len()..self.width {
            buf.push(' ');
        }
        Ok(())
    }
}

/// Logger name, optionally abbreviated to its right-most segments
#[derive(Debug, Clone, Default)]
pub struct LoggerConverter {
    segments: Option<usize>,
}

impl LoggerConverter {
    pub fn new(segments: Option<usize>) -> Self {
        Self { segments }
    }
}

impl Converter for LoggerConverter {
    fn name(&self) -> &str {
        "logger"
    }

    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()> {
        let name = &*record.logger_name;
        match self.segments {
            Some(keep) if keep > 0 => {
                let start = name
                    .rmatch_indices('.')
                    .nth(keep - 1)
                    .map(|(idx, _)| idx + 1)
                    .unwrap_or(0);
                buf.push_str(&name[start..]);
            }
            _ => buf.push_str(name),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MessageConverter;

impl Converter for MessageConverter {
    fn name(&self) -> &str {
        "message"
    }

    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()> {
        record.message.format_into(buf);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadNameConverter;

impl Converter for ThreadNameConverter {
    fn name(&self) -> &str {
        "thread"
    }

    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()> {
        record.write_thread_name(buf);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadIdConverter;

impl Converter for ThreadIdConverter {
    fn name(&self) -> &str {
        "thread_id"
    }

    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()> {
        write!(buf, "{}", record.thread_id)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerConverter;

impl Converter for MarkerConverter {
    fn name(&self) -> &str {
        "marker"
    }

    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()> {
        if let Some(marker) = &record.marker {
            buf.push_str(marker.name());
        }
        Ok(())
    }
}

/// `module(file:line)`, or `?` when the location was not captured
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationConverter;

impl Converter for LocationConverter {
    fn name(&self) -> &str {
        "location"
    }

    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()> {
        match &record.location {
            Some(location) => write!(buf, "{}", location)?,
            None => buf.push('?'),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceConverter;

impl Converter for SequenceConverter {
    fn name(&self) -> &str {
        "sequence"
    }

    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()> {
        write!(buf, "{}", record.sequence)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LineSeparatorConverter;

impl Converter for LineSeparatorConverter {
    fn name(&self) -> &str {
        "newline"
    }

    fn format(&self, _record: &EventRecord, buf: &mut String) -> Result<()> {
        buf.push('\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_event::Marker;
    use crate::core::log_level::LogLevel;

    fn render(converter: &dyn Converter, record: &EventRecord) -> String {
        let mut buf = String::new();
        converter.format(record, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_level_padding_and_case() {
        let record = EventRecord::new("a", LogLevel::Info, "m");
        assert_eq!(render(&LevelConverter::new().padded(5), &record), "INFO ");
        assert_eq!(render(&LevelConverter::new().lowercase(true), &record), "info");
    }

    #[test]
    fn test_logger_segments() {
        let record = EventRecord::new("org.example.db.Pool", LogLevel::Info, "m");
        assert_eq!(render(&LoggerConverter::new(Some(1)), &record), "Pool");
        assert_eq!(render(&LoggerConverter::new(Some(2)), &record), "db.Pool");
        assert_eq!(render(&LoggerConverter::new(Some(10)), &record), "org.example.db.Pool");
        assert_eq!(render(&LoggerConverter::new(None), &record), "org.example.db.Pool");
    }

    #[test]
    fn test_marker_and_location() {
        let record = EventRecord::new("a", LogLevel::Info, "m")
            .with_marker(Marker::new("AUDIT"))
            .with_location("src/db.rs", 42, "app::db");
        assert_eq!(render(&MarkerConverter, &record), "AUDIT");
        assert_eq!(render(&LocationConverter, &record), "app::db(src/db.rs:42)");

        let bare = EventRecord::new("a", LogLevel::Info, "m");
        assert_eq!(render(&MarkerConverter, &bare), "");
        assert_eq!(render(&LocationConverter, &bare), "?");
    }

    #[test]
    fn test_thread_and_sequence() {
        let mut record = EventRecord::new("a", LogLevel::Info, "m").with_thread(12, None);
        record.sequence = 99;
        assert_eq!(render(&ThreadNameConverter, &record), "thread-12");
        assert_eq!(render(&ThreadIdConverter, &record), "12");
        assert_eq!(render(&SequenceConverter, &record), "99");
    }
}
