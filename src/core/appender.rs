//! Sink trait for rendered output
//!
//! Sinks are shared between the consumer thread and callers taking the
//! synchronous path, so they take `&self` and synchronize internally.

use super::error::Result;

pub trait AppenderSink: Send + Sync {
    /// Write one rendered event
    fn write(&self, rendered: &str) -> Result<()>;

    /// Flush buffered output, called at the end of each drained batch
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}
