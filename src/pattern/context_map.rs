//! Diagnostic context converter

use super::Converter;
use crate::core::error::Result;
use crate::core::log_event::EventRecord;

#[derive(Debug, Clone)]
enum Selection {
    /// `{k1=v1, k2=v2}` in key order
    All,
    /// ` k1=v1 k2=v2` appended after a message, nothing when empty
    Fields,
    /// Value only for one key, `{k=v, ...}` for several
    Keys(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ContextMapConverter {
    selection: Selection,
}

impl ContextMapConverter {
    pub fn all() -> Self {
        Self {
            selection: Selection::All,
        }
    }

    pub fn fields() -> Self {
        Self {
            selection: Selection::Fields,
        }
    }

    pub fn keys(keys: &[&str]) -> Self {
        Self {
            selection: Selection::Keys(keys.iter().map(|k| k.to_string()).collect()),
        }
    }
}

impl Converter for ContextMapConverter {
    fn name(&self) -> &str {
        "context"
    }

    fn format(&self, record: &EventRecord, buf: &mut String) -> Result<()> {
        let context = &record.context;
        match &self.selection {
            Selection::All => {
                buf.push('{');
                for (idx, (key, value)) in context.iter().enumerate() {
                    if idx > 0 {
                        buf.push_str(", ");
                    }
                    buf.push_str(key);
                    buf.push('=');
                    buf.push_str(value);
                }
                buf.push('}');
            }
            Selection::Fields => {
                for (key, value) in context.iter() {
                    buf.push(' ');
                    buf.push_str(key);
                    buf.push('=');
                    buf.push_str(value);
                }
            }
            Selection::Keys(keys) if keys.len() == 1 => {
                if let Some(value) = context.get(&keys[0]) {
                    buf.push_str(value);
                }
            }
            Selection::Keys(keys) => {
                buf.push('{');
                let mut first = true;
                for key in keys {
                    if let Some(value) = context.get(key) {
                        if !first {
                            buf.push_str(", ");
                        }
                        first = false;
                        buf.push_str(key);
                        buf.push('=');
                        buf.push_str(value);
                    }
                }
                buf.push('}');
            }
        }
        Ok(())
    }
}
