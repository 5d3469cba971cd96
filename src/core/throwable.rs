//! Captured error chains attached to events
//!
//! A [`ThrowableProxy`] is an owned, immutable copy of an error and its causes,
//! so an event can leave the calling thread without borrowing the error.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// One frame of a captured stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl StackFrame {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            file: None,
            line: None,
        }
    }

    #[must_use]
    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "at {}({}:{})", self.function, file, line),
            (Some(file), None) => write!(f, "at {}({})", self.function, file),
            _ => write!(f, "at {}", self.function),
        }
    }
}

/// Error with its cause chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrowableProxy {
    pub type_name: String,
    pub message: Option<String>,
    pub frames: Vec<StackFrame>,
    pub cause: Option<Box<ThrowableProxy>>,
}

impl ThrowableProxy {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: Some(message.into()),
            frames: Vec::new(),
            cause: None,
        }
    }

    #[must_use]
    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        self.frames.push(frame);
        self
    }

    #[must_use]
    pub fn caused_by(mut self, cause: ThrowableProxy) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Capture `err` and its `source()` chain
    ///
    /// The outermost error keeps its concrete type name; sources are only
    /// reachable as `dyn Error`, so they are labelled by their `Debug` variant.
    pub fn from_error<E: Error + 'static>(err: &E) -> Self {
        let mut proxy = Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: Some(err.to_string()),
            frames: Vec::new(),
            cause: None,
        };
        proxy.cause = err.source().map(|source| Box::new(Self::from_dyn(source)));
        proxy
    }

    fn from_dyn(err: &(dyn Error + 'static)) -> Self {
        Self {
            type_name: debug_type_label(err),
            message: Some(err.to_string()),
            frames: Vec::new(),
            cause: err.source().map(|source| Box::new(Self::from_dyn(source))),
        }
    }

    /// Innermost cause
    pub fn root_cause(&self) -> &ThrowableProxy {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }

    /// Chain from this error down to the root cause
    pub fn chain(&self) -> impl Iterator<Item = &ThrowableProxy> {
        std::iter::successors(Some(self), |t| t.cause.as_deref())
    }

    pub fn depth(&self) -> usize {
        self.chain().count()
    }
}

impl fmt::Display for ThrowableProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.type_name, message),
            None => write!(f, "{}", self.type_name),
        }
    }
}

fn debug_type_label(err: &(dyn Error + 'static)) -> String {
    let debug = format!("{:?}", err);
    let end = debug
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == ':'))
        .unwrap_or(debug.len());
    if end == 0 {
        "Error".to_string()
    } else {
        debug[..end].to_string()
    }
}
