//! Appender writing rendered events to any `io::Write`

use crate::core::{AppenderSink, PipelineError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes each event followed by a newline
///
/// Output is flushed whenever the consumer finishes a batch.
pub struct WriterAppender<W: Write + Send> {
    name: String,
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterAppender<W> {
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer: Mutex::new(writer),
        }
    }

    /// Take the writer back, e.g. to inspect an in-memory buffer
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl WriterAppender<BufWriter<File>> {
    /// Append to the file at `path`, creating it if needed
    pub fn file(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let name = name.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .map_err(|e| PipelineError::sink(name.clone(), e))?;
        Ok(Self::new(name, BufWriter::new(file)))
    }
}

impl<W: Write + Send> AppenderSink for WriterAppender<W> {
    fn write(&self, rendered: &str) -> Result<()> {
        let mut writer = self.writer.lock();
        writer
            .write_all(rendered.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .map_err(|e| PipelineError::sink(self.name.clone(), e))
    }

    fn flush(&self) -> Result<()> {
        self.writer
            .lock()
            .flush()
            .map_err(|e| PipelineError::sink(self.name.clone(), e))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<W: Write + Send> std::fmt::Debug for WriterAppender<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterAppender").field("name", &self.name).finish()
    }
}
