//! Timestamp formatting utilities
//!
//! Provides standardized, configurable timestamp formats for log output.
//! Supports ISO 8601, RFC 3339, Unix timestamps, and custom formats.
//! Formatting appends to a caller-supplied buffer so the date converter can
//! reuse its cache buffer between events.

use super::instant::{Instant, Precision};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};

/// Standardized timestamp format options
///
/// # Examples
///
/// ```
/// use rust_log_pipeline::core::{Instant, TimestampFormat};
///
/// let format = TimestampFormat::Iso8601;
/// let mut buf = String::new();
/// format.format_into(&Instant::from_epoch_millis(0), &mut buf).unwrap();
/// assert_eq!(buf, "1970-01-01T00:00:00.000Z");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampFormat {
    /// ISO 8601 with milliseconds: `2025-01-08T10:30:45.123Z`
    #[default]
    Iso8601,

    /// ISO 8601 with microseconds: `2025-01-08T10:30:45.123456Z`
    Iso8601Micros,

    /// ISO 8601 with nanoseconds: `2025-01-08T10:30:45.123456789Z`
    Iso8601Nanos,

    /// RFC 3339 format: `2025-01-08T10:30:45.123+00:00`
    Rfc3339,

    /// Unix timestamp in seconds: `1736332245`
    Unix,

    /// Unix timestamp in milliseconds: `1736332245123`
    UnixMillis,

    /// Unix timestamp in microseconds: `1736332245123456`
    UnixMicros,

    /// Custom strftime format, e.g. `"%d/%b/%Y:%H:%M:%S %z"`
    Custom(String),
}

impl TimestampFormat {
    /// Append the rendered instant to `buf`
    ///
    /// Fails only for a `Custom` pattern chrono cannot render.
    pub fn format_into(&self, instant: &Instant, buf: &mut String) -> fmt::Result {
        match self {
            TimestampFormat::Unix => write!(buf, "{}", instant.epoch_second()),
            TimestampFormat::UnixMillis => write!(buf, "{}", instant.epoch_millis()),
            TimestampFormat::UnixMicros => write!(buf, "{}", instant.epoch_micros()),
            TimestampFormat::Iso8601 => {
                write!(buf, "{}", instant.to_datetime().format("%Y-%m-%dT%H:%M:%S%.3fZ"))
            }
            TimestampFormat::Iso8601Micros => {
                write!(buf, "{}", instant.to_datetime().format("%Y-%m-%dT%H:%M:%S%.6fZ"))
            }
            TimestampFormat::Iso8601Nanos => {
                write!(buf, "{}", instant.to_datetime().format("%Y-%m-%dT%H:%M:%S%.9fZ"))
            }
            TimestampFormat::Rfc3339 => write!(
                buf,
                "{}",
                instant.to_datetime().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
            ),
            TimestampFormat::Custom(pattern) => {
                write!(buf, "{}", instant.to_datetime().format(pattern))
            }
        }
    }

    /// Format into a fresh `String`
    #[must_use]
    pub fn format(&self, instant: &Instant) -> String {
        let mut buf = String::with_capacity(32);
        if self.format_into(instant, &mut buf).is_err() {
            buf.clear();
        }
        buf
    }

    /// Finest resolution this format renders
    #[must_use]
    pub fn precision(&self) -> Precision {
        match self {
            TimestampFormat::Unix => Precision::Seconds,
            TimestampFormat::Iso8601 | TimestampFormat::Rfc3339 | TimestampFormat::UnixMillis => {
                Precision::Millis
            }
            TimestampFormat::Iso8601Micros | TimestampFormat::UnixMicros => Precision::Micros,
            TimestampFormat::Iso8601Nanos => Precision::Nanos,
            TimestampFormat::Custom(pattern) => custom_precision(pattern),
        }
    }

    /// Check if this is a Unix-based numeric format
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            TimestampFormat::Unix | TimestampFormat::UnixMillis | TimestampFormat::UnixMicros
        )
    }

    /// Numeric formats are cheap enough that caching brings nothing
    #[must_use]
    pub fn benefits_from_cache(&self) -> bool {
        !self.is_numeric()
    }

    /// Resolve a named format (`UNIX`, `UNIX_MILLIS`, `ISO8601`, ...) or treat
    /// the name as a strftime pattern
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "UNIX" => TimestampFormat::Unix,
            "UNIX_MILLIS" => TimestampFormat::UnixMillis,
            "UNIX_MICROS" => TimestampFormat::UnixMicros,
            "ISO8601" => TimestampFormat::Iso8601,
            "ISO8601_MICROS" => TimestampFormat::Iso8601Micros,
            "ISO8601_NANOS" => TimestampFormat::Iso8601Nanos,
            "RFC3339" => TimestampFormat::Rfc3339,
            other => TimestampFormat::Custom(other.to_string()),
        }
    }
}

/// chrono specifiers that never render below one second
const WHOLE_SECOND_SPECIFIERS: &str = "YCymbBhdeaAwuUWGgVjDxFvHkIlPpMSRTXrZzstnc%";

/// Finest precision any specifier in a chrono pattern renders
///
/// Anything not recognized as whole-second or a fixed-width fraction is
/// treated as nanosecond precision, so the cache never serves a stale value.
fn custom_precision(pattern: &str) -> Precision {
    let mut finest = Precision::Seconds;
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        let mut width = None;
        let specifier = loop {
            match chars.next() {
                Some(digit @ ('3' | '6' | '9')) => width = Some(digit),
                Some('-' | '_' | '0' | '.' | ':' | '#') => {}
                other => break other,
            }
        };
        let precision = match (specifier, width) {
            (Some('f'), Some('3')) => Precision::Millis,
            (Some('f'), Some('6')) => Precision::Micros,
            (Some(ch), None) if WHOLE_SECOND_SPECIFIERS.contains(ch) => Precision::Seconds,
            _ => Precision::Nanos,
        };
        finest = finest.max(precision);
    }
    finest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_instant() -> Instant {
        // 2025-01-08 10:30:45.123456789 UTC
        Instant::new(1_736_332_245, 123_456_789)
    }

    #[test]
    fn test_iso8601_format() {
        assert_eq!(
            TimestampFormat::Iso8601.format(&fixed_instant()),
            "2025-01-08T10:30:45.123Z"
        );
        assert_eq!(
            TimestampFormat::Iso8601Micros.format(&fixed_instant()),
            "2025-01-08T10:30:45.123456Z"
        );
        assert_eq!(
            TimestampFormat::Iso8601Nanos.format(&fixed_instant()),
            "2025-01-08T10:30:45.123456789Z"
        );
    }

    #[test]
    fn test_rfc3339_format() {
        let result = TimestampFormat::Rfc3339.format(&fixed_instant());
        assert_eq!(result, "2025-01-08T10:30:45.123+00:00");
    }

    #[test]
    fn test_unix_formats() {
        assert_eq!(TimestampFormat::Unix.format(&fixed_instant()), "1736332245");
        assert_eq!(
            TimestampFormat::UnixMillis.format(&fixed_instant()),
            "1736332245123"
        );
        assert_eq!(
            TimestampFormat::UnixMicros.format(&fixed_instant()),
            "1736332245123456"
        );
    }

    #[test]
    fn test_custom_apache_format() {
        let format = TimestampFormat::Custom("%d/%b/%Y:%H:%M:%S +0000".to_string());
        assert_eq!(format.format(&fixed_instant()), "08/Jan/2025:10:30:45 +0000");
    }

    #[test]
    fn test_format_into_appends() {
        let mut buf = String::from("ts=");
        TimestampFormat::Unix
            .format_into(&fixed_instant(), &mut buf)
            .unwrap();
        assert_eq!(buf, "ts=1736332245");
    }

    #[test]
    fn test_precision() {
        assert_eq!(TimestampFormat::Unix.precision(), Precision::Seconds);
        assert_eq!(TimestampFormat::Iso8601.precision(), Precision::Millis);
        assert_eq!(TimestampFormat::UnixMicros.precision(), Precision::Micros);
        assert_eq!(
            TimestampFormat::Custom("%H:%M:%S%.6f".into()).precision(),
            Precision::Micros
        );
        assert_eq!(
            TimestampFormat::Custom("%Y-%m-%d".into()).precision(),
            Precision::Seconds
        );
        assert_eq!(
            TimestampFormat::Custom("%H:%M:%S%.3f".into()).precision(),
            Precision::Millis
        );
        assert_eq!(
            TimestampFormat::Custom("%d/%b/%Y:%H:%M:%S %:z".into()).precision(),
            Precision::Seconds
        );
    }

    #[test]
    fn test_auto_fraction_patterns_use_nanos() {
        assert_eq!(TimestampFormat::Custom("%+".into()).precision(), Precision::Nanos);
        assert_eq!(
            TimestampFormat::Custom("%H:%M:%S%.f".into()).precision(),
            Precision::Nanos
        );
        assert_eq!(TimestampFormat::Custom("%f".into()).precision(), Precision::Nanos);
        assert_eq!(
            TimestampFormat::Custom("%Y %Q".into()).precision(),
            Precision::Nanos
        );
    }

    #[test]
    fn test_from_name() {
        assert_eq!(TimestampFormat::from_name("UNIX"), TimestampFormat::Unix);
        assert_eq!(
            TimestampFormat::from_name("UNIX_MILLIS"),
            TimestampFormat::UnixMillis
        );
        assert_eq!(
            TimestampFormat::from_name("%H:%M"),
            TimestampFormat::Custom("%H:%M".into())
        );
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&TimestampFormat::Iso8601).expect("serialize");
        assert_eq!(json, "\"Iso8601\"");

        let format: TimestampFormat =
            serde_json::from_str(r#"{"Custom":"%Y-%m-%d"}"#).expect("deserialize Custom");
        assert_eq!(format, TimestampFormat::Custom("%Y-%m-%d".to_string()));
    }
}
