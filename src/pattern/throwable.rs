//! Throwable chain converter

use super::Converter;
use crate::core::error::Result;
use crate::core::log_event::EventRecord;
use crate::core::throwable::ThrowableProxy;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

const CAUSED_BY_LABEL: &str = "Caused by: ";
const WRAPPED_BY_LABEL: &str = "Wrapped by: ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThrowableStyle {
    /// Outermost error first, each cause prefixed with `Caused by: `
    #[default]
    Standard,
    /// Root cause first, each wrapper prefixed with `Wrapped by: `
    RootCauseFirst,
}

/// Renders the attached error chain, one line per error and frame
#[derive(Debug, Clone)]
pub struct ThrowableConverter {
    style: ThrowableStyle,
    max_lines: Option<usize>,
    on_new_line: bool,
}

impl ThrowableConverter {
    pub fn new(style: ThrowableStyle, max_lines: Option<usize>) -> Self {
        Self {
            style,
            max_lines,
            on_new_line: false,
        }
    }

    /// Start on a new line when there is something to render
    #[must_use]
    pub fn on_new_line(mut self) -> Self {
        self.on_new_line = true;
        self
    }

    fn render(&self, thrown: &ThrowableProxy, buf: &mut String) -> Result<()> {
        let mut lines = LineWriter {
            buf,
            written: 0,
            limit: self.max_lines.unwrap_or(usize::MAX),
            leading_newline: self.on_new_line,
        };
        match self.style {
            ThrowableStyle::Standard => {
                for (depth, error) in thrown.chain().enumerate() {
                    let label = if depth == 0 { "" } else { CAUSED_BY_LABEL };
                    if !lines.error(label, error)? {
                        break;
                    }
                }
            }
            ThrowableStyle::RootCauseFirst => {
                // Quadratic in chain depth, but no scratch allocation
                for depth in (0..thrown.depth()).rev() {
                    let Some(error) = thrown.chain().nth(depth) else {
                        break;
                    };
                    let label = if error.cause.is_none() { "" } else { WRAPPED_BY_LABEL };
                    if !lines.error(label, error)? {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

struct LineWriter<'a> {
    buf: &'a mut String,
    written: usize,
    limit: usize,
    leading_newline: bool,
}

impl LineWriter<'_> {
    fn start_line(&mut self) -> bool {
        if self.written >= self.limit {
            return false;
        }
        if self.written > 0 || self.leading_newline {
            self.buf.push('\n');
        }
        self.written += 1;
        true
    }

    /// Returns false once the line cap is reached
    fn error(&mut self, label: &str, error: &ThrowableProxy) -> Result<bool> {
        if !self.start_line() {
            return Ok(false);
        }
        self.buf.push_str(label);
        write!(self.buf, "{}", error)?;
        for frame in &error.frames {
            if !self.start_line() {
                return Ok(false);
            }
            write!(self.buf, "\t{}", frame)?;
        }
        Ok(true)
    }
}

impl Converter for ThrowableConverter {
    fn name(&self) -> &str {
        "throwable"
    }

    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()> {
        match &record.thrown {
            Some(thrown) => self.render(thrown, buf),
            None => Ok(()),
        }
    }
}
