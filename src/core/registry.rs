//! Name-to-constructor registry for queue-full policies

use super::queue_full_policy::{
    blocking_policy, default_policy, discarding_policy, QueueFullPolicy,
};
use super::settings::PipelineSettings;
use super::status::StatusLogger;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What a policy constructor gets to see
pub struct PolicyContext<'a> {
    pub settings: &'a PipelineSettings,
    pub status: &'a Arc<StatusLogger>,
}

pub type PolicyConstructor =
    Arc<dyn Fn(&PolicyContext<'_>) -> Arc<dyn QueueFullPolicy> + Send + Sync>;

/// Policy constructors by case-insensitive name
///
/// Pre-populated with `Default`, `Discard` and `Block`. Loaders register
/// further policies before building a pipeline.
///
/// # Example
///
/// ```
/// use rust_log_pipeline::core::{DefaultQueueFullPolicy, PolicyRegistry};
/// use std::sync::Arc;
///
/// let registry = PolicyRegistry::new();
/// registry.register("Patient", |_ctx| Arc::new(DefaultQueueFullPolicy::new(100)));
/// assert!(registry.contains("patient"));
/// ```
pub struct PolicyRegistry {
    constructors: RwLock<HashMap<String, PolicyConstructor>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register("Default", default_policy);
        registry.register("Discard", discarding_policy);
        registry.register("Block", blocking_policy);
        registry
    }

    pub fn empty() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
        }
    }

    /// Register or replace a constructor
    pub fn register<F>(&self, name: &str, constructor: F)
    where
        F: Fn(&PolicyContext<'_>) -> Arc<dyn QueueFullPolicy> + Send + Sync + 'static,
    {
        self.constructors
            .write()
            .insert(name.to_lowercase(), Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.read().contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the policy named `name`
    ///
    /// Unknown names fall back to the default policy with a status warning.
    pub fn create(&self, name: &str, ctx: &PolicyContext<'_>) -> Arc<dyn QueueFullPolicy> {
        let constructor = self.constructors.read().get(&name.to_lowercase()).cloned();
        match constructor {
            Some(constructor) => constructor(ctx),
            None => {
                ctx.status.warn(format!(
                    "Unknown queue-full policy '{}', using Default",
                    name
                ));
                default_policy(ctx)
            }
        }
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("policies", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_level::LogLevel;
    use crate::core::queue_full_policy::BlockingQueueFullPolicy;

    fn status() -> Arc<StatusLogger> {
        Arc::new(StatusLogger::new(LogLevel::Debug))
    }

    #[test]
    fn test_builtin_names_case_insensitive() {
        let registry = PolicyRegistry::new();
        let settings = PipelineSettings::default();
        let status = status();
        let ctx = PolicyContext {
            settings: &settings,
            status: &status,
        };

        assert_eq!(registry.create("DISCARD", &ctx).name(), "Discard");
        assert_eq!(registry.create("default", &ctx).name(), "Default");
        assert_eq!(registry.create("Block", &ctx).name(), "Block");
    }

    #[test]
    fn test_unknown_falls_back_to_default() {
        let registry = PolicyRegistry::new();
        let settings = PipelineSettings::default();
        let status = status();
        let ctx = PolicyContext {
            settings: &settings,
            status: &status,
        };

        assert_eq!(registry.create("nonsense", &ctx).name(), "Default");
        assert_eq!(status.entries_containing("nonsense").len(), 1);
    }

    #[test]
    fn test_register_custom() {
        let registry = PolicyRegistry::empty();
        assert!(!registry.contains("Default"));
        registry.register("Wait", |_| Arc::new(BlockingQueueFullPolicy));
        assert_eq!(registry.names(), vec!["wait".to_string()]);

        let settings = PipelineSettings::default();
        let status = status();
        let ctx = PolicyContext {
            settings: &settings,
            status: &status,
        };
        assert_eq!(registry.create("WAIT", &ctx).name(), "Block");
    }
}
