//! Appender sinks

pub mod memory;
pub mod writer;

pub use memory::InMemoryAppender;
pub use writer::WriterAppender;

pub use crate::core::AppenderSink;
