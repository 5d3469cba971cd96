//! Pattern string parser
//!
//! Supported conversions, with optional `-N`/`N` width modifiers:
//!
//! | Pattern | Output |
//! |---------|--------|
//! | `%d{FORMAT}`, `%date` | instant, `FORMAT` is a name such as `UNIX_MILLIS` or a strftime pattern |
//! | `%p`, `%level{lowerCase=true}` | level |
//! | `%c{N}`, `%logger` | logger name, right-most `N` segments |
//! | `%m`, `%msg`, `%message` | message |
//! | `%t`, `%thread` / `%T`, `%tid` | thread name / id |
//! | `%X{k1,k2}`, `%mdc` | context map, or selected keys |
//! | `%marker` | marker name |
//! | `%l`, `%location` | source location |
//! | `%sn`, `%sequenceNumber` | sequence number |
//! | `%ex{N}`, `%throwable` / `%rEx{N}`, `%rootException` | error chain, top-down / root first |
//! | `%replace{pattern}{regex}{replacement}` | regex replacement over a nested pattern |
//! | `%json` | whole event as JSON |
//! | `%n` / `%%` | newline / literal `%` |

use super::{
    ContextMapConverter, Converter, DateConverter, FormatterChain, JsonEventConverter,
    LevelConverter, LineSeparatorConverter, LiteralConverter, LocationConverter, LoggerConverter,
    MarkerConverter, MessageConverter, RegexReplaceConverter, SequenceConverter, ThreadIdConverter,
    ThreadNameConverter, ThrowableConverter, ThrowableStyle,
};
use crate::core::error::{PipelineError, Result};
use crate::core::log_event::EventRecord;
use crate::core::recycler::RecyclerFactory;
use crate::core::timestamp::TimestampFormat;

const CONVERSIONS: &[&str] = &[
    "d",
    "date",
    "p",
    "level",
    "c",
    "logger",
    "m",
    "msg",
    "message",
    "t",
    "thread",
    "T",
    "tid",
    "X",
    "mdc",
    "MDC",
    "marker",
    "l",
    "location",
    "sn",
    "sequenceNumber",
    "n",
    "ex",
    "throwable",
    "rEx",
    "rootException",
    "replace",
    "json",
];

/// Pads the output of another converter to a minimum width
#[derive(Debug)]
struct Padded {
    inner: Box<dyn Converter>,
    width: usize,
    left_align: bool,
}

impl Converter for Padded {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()> {
        let start = buf.len();
        self.inner.format(record, buf)?;
        let written = buf[start..].chars().count();
        if written < self.width {
            let fill = self.width - written;
            if self.left_align {
                buf.extend(std::iter::repeat(' ').take(fill));
            } else {
                buf.insert_str(start, &" ".repeat(fill));
            }
        }
        Ok(())
    }
}

/// Parse `pattern` into converters
pub fn parse_pattern(pattern: &str, recycler: &RecyclerFactory) -> Result<Vec<Box<dyn Converter>>> {
    let mut parser = Parser {
        chars: pattern.chars().collect(),
        pos: 0,
        recycler,
    };
    parser.parse()
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    recycler: &'a RecyclerFactory,
}

impl Parser<'_> {
    fn parse(&mut self) -> Result<Vec<Box<dyn Converter>>> {
        let mut converters: Vec<Box<dyn Converter>> = Vec::new();
        let mut literal = String::new();

        while let Some(c) = self.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            if self.peek() == Some('%') {
                self.pos += 1;
                literal.push('%');
                continue;
            }

            let (left_align, width) = self.modifiers();
            let run = self.take_while(|c| c.is_ascii_alphabetic());
            let name = CONVERSIONS
                .iter()
                .filter(|known| run.starts_with(*known))
                .max_by_key(|known| known.len())
                .ok_or_else(|| {
                    PipelineError::config("pattern", format!("Unknown conversion '%{}'", run))
                })?;
            let trailing = &run[name.len()..];
            // Options only bind when nothing follows the conversion name
            let options = if trailing.is_empty() {
                self.options()?
            } else {
                Vec::new()
            };

            if !literal.is_empty() {
                converters.push(Box::new(LiteralConverter::new(&literal)));
                literal.clear();
            }

            let converter = self.build(name, &options)?;
            converters.push(match width {
                Some(width) => Box::new(Padded {
                    inner: converter,
                    width,
                    left_align,
                }),
                None => converter,
            });
            literal.push_str(trailing);
        }

        if !literal.is_empty() {
            converters.push(Box::new(LiteralConverter::new(&literal)));
        }
        Ok(converters)
    }

    fn build(&self, name: &str, options: &[String]) -> Result<Box<dyn Converter>> {
        let first = options.first().map(String::as_str);
        let converter: Box<dyn Converter> = match name {
            "d" | "date" => {
                let format = first.map_or(TimestampFormat::Iso8601, TimestampFormat::from_name);
                Box::new(DateConverter::new(format, self.recycler))
            }
            "p" | "level" => {
                let lowercase = first
                    .is_some_and(|o| o.replace(' ', "").eq_ignore_ascii_case("lowercase=true"));
                Box::new(LevelConverter::new().lowercase(lowercase))
            }
            "c" | "logger" => Box::new(LoggerConverter::new(parse_count(first, "logger")?)),
            "m" | "msg" | "message" => Box::new(MessageConverter),
            "t" | "thread" => Box::new(ThreadNameConverter),
            "T" | "tid" => Box::new(ThreadIdConverter),
            "X" | "mdc" | "MDC" => match first {
                Some(keys) => {
                    let keys: Vec<&str> = keys
                        .split(',')
                        .map(str::trim)
                        .filter(|k| !k.is_empty())
                        .collect();
                    Box::new(ContextMapConverter::keys(&keys))
                }
                None => Box::new(ContextMapConverter::all()),
            },
            "marker" => Box::new(MarkerConverter),
            "l" | "location" => Box::new(LocationConverter),
            "sn" | "sequenceNumber" => Box::new(SequenceConverter),
            "n" => Box::new(LineSeparatorConverter),
            "ex" | "throwable" => Box::new(ThrowableConverter::new(
                ThrowableStyle::Standard,
                parse_count(first, "throwable")?,
            )),
            "rEx" | "rootException" => Box::new(ThrowableConverter::new(
                ThrowableStyle::RootCauseFirst,
                parse_count(first, "rootException")?,
            )),
            "replace" => {
                if options.len() != 3 {
                    return Err(PipelineError::config(
                        "pattern",
                        "%replace needs {pattern}{regex}{replacement}",
                    ));
                }
                let inner = FormatterChain::from_pattern_with(&options[0], self.recycler)?;
                Box::new(RegexReplaceConverter::new(
                    inner,
                    &options[1],
                    &options[2],
                    self.recycler,
                )?)
            }
            "json" => Box::new(JsonEventConverter::with_recycler(
                first.map_or(TimestampFormat::Iso8601, TimestampFormat::from_name),
                self.recycler,
            )),
            other => {
                return Err(PipelineError::config(
                    "pattern",
                    format!("Unknown conversion '%{}'", other),
                ))
            }
        };
        Ok(converter)
    }

    fn modifiers(&mut self) -> (bool, Option<usize>) {
        let left_align = self.peek() == Some('-');
        if left_align {
            self.pos += 1;
        }
        let digits = self.take_while(|c| c.is_ascii_digit());
        (left_align, digits.parse().ok())
    }

    /// Consecutive `{...}` groups, braces may nest
    fn options(&mut self) -> Result<Vec<String>> {
        let mut options = Vec::new();
        while self.peek() == Some('{') {
            self.pos += 1;
            let mut depth = 1;
            let mut option = String::new();
            loop {
                let c = self.next().ok_or_else(|| {
                    PipelineError::config("pattern", "Unclosed '{' in conversion options")
                })?;
                match c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                option.push(c);
            }
            options.push(option);
        }
        Ok(options)
    }

    fn next(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }
}

fn parse_count(option: Option<&str>, conversion: &str) -> Result<Option<usize>> {
    match option {
        None => Ok(None),
        Some(text) => text.trim().parse().map(Some).map_err(|_| {
            PipelineError::config(
                "pattern",
                format!("%{} expects a number, got '{}'", conversion, text),
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instant::Instant;
    use crate::core::log_context::ContextMap;
    use crate::core::log_level::LogLevel;

    fn record() -> EventRecord {
        EventRecord::new("org.example.Service", LogLevel::Info, "started")
            .with_instant(Instant::new(1_736_332_245, 123_000_000))
            .with_thread(1, Some("main"))
            .with_context(ContextMap::new().with_field("user", "alice").with_field("req", "7"))
    }

    fn render(pattern: &str) -> String {
        FormatterChain::from_pattern(pattern)
            .unwrap()
            .render_to_string(&record())
    }

    #[test]
    fn test_typical_layout() {
        assert_eq!(
            render("%d [%t] %-5level %c{1} - %msg%n"),
            "2025-01-08T10:30:45.123Z [main] INFO  Service - started\n"
        );
    }

    #[test]
    fn test_named_and_custom_dates() {
        assert_eq!(render("%d{UNIX_MILLIS}"), "1736332245123");
        assert_eq!(render("%d{%H:%M:%S}"), "10:30:45");
    }

    #[test]
    fn test_context_forms() {
        assert_eq!(render("%X"), "{req=7, user=alice}");
        assert_eq!(render("%X{user}"), "alice");
        assert_eq!(render("%X{user, req}"), "{user=alice, req=7}");
    }

    #[test]
    fn test_escape_and_right_align() {
        assert_eq!(render("100%% %5p|"), "100%  INFO|");
    }

    #[test]
    fn test_longest_prefix_with_trailing_text() {
        // `%msgs` is `%msg` followed by a literal `s`
        assert_eq!(render("%msgs"), "starteds");
    }

    #[test]
    fn test_lowercase_level() {
        assert_eq!(render("%level{lowerCase=true}"), "info");
    }

    #[test]
    fn test_replace_nested() {
        assert_eq!(render("%replace{%msg %X{user}}{a}{4}"), "st4rted 4lice");
    }

    #[test]
    fn test_errors() {
        assert!(FormatterChain::from_pattern("%bogus").is_err());
        assert!(FormatterChain::from_pattern("%d{ISO8601").is_err());
        assert!(FormatterChain::from_pattern("%c{x}").is_err());
        assert!(FormatterChain::from_pattern("%replace{%m}").is_err());
    }
}
