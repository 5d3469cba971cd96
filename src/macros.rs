//! Logging macros
//!
//! The macros take a [`Logger`](crate::core::Logger) handle and a format
//! string. Arguments are only formatted when the level is enabled, and the
//! call site is attached when the logger captures locations.

/// Log a message at the given level.
///
/// # Examples
///
/// ```
/// use rust_log_pipeline::prelude::*;
/// use rust_log_pipeline::log;
///
/// let pipeline = Pipeline::builder().build().unwrap();
/// let logger = pipeline.logger("app");
/// log!(logger, LogLevel::Info, "Processing {} items", 100);
/// ```
#[macro_export]
macro_rules! log {
    ($logger:expr, $level:expr, $($arg:tt)+) => {{
        let logger = &$logger;
        let level: $crate::LogLevel = $level;
        if logger.is_enabled(level) {
            logger.log_located(level, format!($($arg)+), file!(), line!(), module_path!())
        } else {
            logger.log(level, "")
        }
    }};
}

/// Log a trace-level message.
#[macro_export]
macro_rules! trace {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Trace, $($arg)+)
    };
}

/// Log a debug-level message.
#[macro_export]
macro_rules! debug {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Debug, $($arg)+)
    };
}

/// Log an info-level message.
///
/// # Examples
///
/// ```
/// use rust_log_pipeline::prelude::*;
/// use rust_log_pipeline::info;
///
/// let pipeline = Pipeline::builder().build().unwrap();
/// let logger = pipeline.logger("app");
/// info!(logger, "Application started");
/// ```
#[macro_export]
macro_rules! info {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Info, $($arg)+)
    };
}

/// Log a warning-level message.
#[macro_export]
macro_rules! warn {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Warn, $($arg)+)
    };
}

/// Log an error-level message.
#[macro_export]
macro_rules! error {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Error, $($arg)+)
    };
}

/// Log a fatal-level message.
#[macro_export]
macro_rules! fatal {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::LogLevel::Fatal, $($arg)+)
    };
}
