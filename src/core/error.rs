//! Error types for the logging pipeline

use super::log_level::LogLevel;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Queue full and the policy chose to discard the event
    #[error("Event discarded at level {level}: {dropped} events dropped so far")]
    Discarded { level: LogLevel, dropped: u64 },

    /// A converter failed while rendering an event
    #[error("Formatter error ({converter}): {message}")]
    Format { converter: String, message: String },

    /// Downstream sink I/O failure
    #[error("Sink '{appender}' failed: {source}")]
    Sink {
        appender: String,
        #[source]
        source: std::io::Error,
    },

    /// Sink failure without an underlying I/O error
    #[error("Sink write error: {0}")]
    SinkWrite(String),

    /// In-flight events of a generation did not drain in time
    #[error(
        "Reconfiguration timed out after {waited:?}: generation {generation} still has {in_flight} events in flight"
    )]
    ReconfigurationTimeout {
        generation: u64,
        in_flight: usize,
        waited: Duration,
    },

    /// Pool, transport or worker could not be constructed
    #[error("Failed to initialize {component}: {message}")]
    Initialization { component: String, message: String },

    /// Invalid configuration with details
    #[error("Invalid configuration for {component}: {message}")]
    InvalidConfiguration { component: String, message: String },

    /// Pipeline already stopped
    #[error("Pipeline already stopped")]
    PipelineStopped,

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A `fmt::Write` target refused output
    #[error("Formatting error: {0}")]
    Fmt(#[from] std::fmt::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Create a discard error
    pub fn discarded(level: LogLevel, dropped: u64) -> Self {
        PipelineError::Discarded { level, dropped }
    }

    /// Create a formatter error
    pub fn format(converter: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Format {
            converter: converter.into(),
            message: message.into(),
        }
    }

    /// Create a sink error wrapping an I/O failure
    pub fn sink(appender: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Sink {
            appender: appender.into(),
            source,
        }
    }

    /// Create a sink error from a message
    pub fn sink_write<S: Into<String>>(msg: S) -> Self {
        PipelineError::SinkWrite(msg.into())
    }

    /// Create a reconfiguration timeout error
    pub fn reconfiguration_timeout(generation: u64, in_flight: usize, waited: Duration) -> Self {
        PipelineError::ReconfigurationTimeout {
            generation,
            in_flight,
            waited,
        }
    }

    /// Create an initialization error
    pub fn init(component: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Initialization {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn config(component: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::InvalidConfiguration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        PipelineError::Other(msg.into())
    }

    /// Whether the pipeline keeps running after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            PipelineError::Initialization { .. } | PipelineError::InvalidConfiguration { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PipelineError::discarded(LogLevel::Debug, 3);
        assert!(matches!(err, PipelineError::Discarded { .. }));

        let err = PipelineError::config("ring_buffer_size", "must be positive");
        assert!(matches!(err, PipelineError::InvalidConfiguration { .. }));
        assert!(!err.is_recoverable());

        let err = PipelineError::init("RingTransport", "capacity overflow");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = PipelineError::discarded(LogLevel::Info, 10);
        assert_eq!(
            err.to_string(),
            "Event discarded at level INFO: 10 events dropped so far"
        );

        let err = PipelineError::format("date", "bad pattern");
        assert_eq!(err.to_string(), "Formatter error (date): bad pattern");

        let err = PipelineError::reconfiguration_timeout(2, 5, Duration::from_millis(100));
        assert!(err.to_string().contains("generation 2"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_sink_error_source() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = PipelineError::sink("remote", io_err);

        assert!(err.to_string().contains("remote"));
        assert!(err.source().is_some());
    }
}
