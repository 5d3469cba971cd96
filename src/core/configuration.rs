//! Immutable routing snapshot consumed by the pipeline
//!
//! A [`Configuration`] owns its routes and a table of named appenders.
//! Routes reference appenders by name only; nothing points back from an
//! appender to a route or to the configuration.

use super::appender::AppenderSink;
use super::error::Result;
use super::filter::{Filter, FilterChain, FilterResult};
use super::log_event::EventRecord;
use super::log_level::LogLevel;
use super::recycler::RecyclerFactory;
use crate::pattern::FormatterChain;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Reference from a route to a named appender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppenderRef {
    pub name: String,
    /// Events below this level skip the appender
    pub level: Option<LogLevel>,
}

impl AppenderRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: None,
        }
    }

    pub fn at(name: impl Into<String>, level: LogLevel) -> Self {
        Self {
            name: name.into(),
            level: Some(level),
        }
    }

    pub fn accepts(&self, level: LogLevel) -> bool {
        self.level.map_or(true, |min| level >= min)
    }
}

/// Routing for one logger-name prefix
///
/// `"app.db"` matches the loggers `app.db` and `app.db.pool` but not
/// `app.dbx`. The empty prefix is the root route.
#[derive(Debug, Clone)]
pub struct Route {
    prefix: String,
    level: LogLevel,
    refs: Vec<AppenderRef>,
    filters: FilterChain,
    additive: bool,
}

impl Route {
    pub fn new(prefix: impl Into<String>, level: LogLevel) -> Self {
        Self {
            prefix: prefix.into(),
            level,
            refs: Vec::new(),
            filters: FilterChain::new(),
            additive: true,
        }
    }

    #[must_use = "builder methods return a new value"]
    pub fn appender_ref(mut self, name: impl Into<String>) -> Self {
        self.refs.push(AppenderRef::new(name));
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn appender_ref_at(mut self, name: impl Into<String>, level: LogLevel) -> Self {
        self.refs.push(AppenderRef::at(name, level));
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters = self.filters.with(filter);
        self
    }

    /// Whether events also travel to the enclosing routes
    #[must_use = "builder methods return a new value"]
    pub fn additive(mut self, additive: bool) -> Self {
        self.additive = additive;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn refs(&self) -> &[AppenderRef] {
        &self.refs
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub fn is_additive(&self) -> bool {
        self.additive
    }

    pub fn is_root(&self) -> bool {
        self.prefix.is_empty()
    }

    pub fn matches(&self, logger: &str) -> bool {
        if self.prefix.is_empty() {
            return true;
        }
        match logger.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('.'),
            None => false,
        }
    }
}

/// A sink together with the layout rendering events for it
#[derive(Clone)]
pub struct AppenderBinding {
    pub sink: Arc<dyn AppenderSink>,
    pub layout: Arc<FormatterChain>,
}

impl AppenderBinding {
    pub fn new(sink: Arc<dyn AppenderSink>, layout: FormatterChain) -> Self {
        Self {
            sink,
            layout: Arc::new(layout),
        }
    }
}

impl fmt::Debug for AppenderBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppenderBinding")
            .field("sink", &self.sink.name())
            .field("layout", &self.layout.converter_names())
            .finish()
    }
}

/// Routes, global filters and appenders of one generation
#[derive(Debug)]
pub struct Configuration {
    name: String,
    /// Sorted by prefix length, longest first; the root route is last
    routes: Vec<Route>,
    filters: FilterChain,
    appenders: HashMap<String, AppenderBinding>,
}

impl Configuration {
    pub fn builder(name: impl Into<String>) -> ConfigurationBuilder {
        ConfigurationBuilder::new(name)
    }

    /// Configuration routing nothing anywhere; used until the first reconfigure
    pub fn empty() -> Self {
        Self::builder("empty").build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_level(&self) -> LogLevel {
        self.root().level
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub fn appender(&self, name: &str) -> Option<&AppenderBinding> {
        self.appenders.get(name)
    }

    pub fn appenders(&self) -> impl Iterator<Item = (&str, &AppenderBinding)> {
        self.appenders.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Rebuild rebuildable layouts so their scratch pools use `recyclers`
    ///
    /// Called by the pipeline when the configuration is installed, so the
    /// recycler settings apply to every pattern layout.
    pub fn bind_recyclers(mut self, recyclers: &RecyclerFactory) -> Result<Self> {
        for binding in self.appenders.values_mut() {
            if let Some(layout) = binding.layout.rebind(recyclers)? {
                binding.layout = Arc::new(layout);
            }
        }
        Ok(self)
    }

    fn root(&self) -> &Route {
        // The builder always appends a root route
        &self.routes[self.routes.len() - 1]
    }

    /// The most specific route for `logger`
    pub fn resolve(&self, logger: &str) -> &Route {
        self.routes
            .iter()
            .find(|route| route.matches(logger))
            .unwrap_or_else(|| self.root())
    }

    /// Resolved route followed by its ancestors while routes are additive
    pub fn route_chain<'a>(&'a self, logger: &'a str) -> RouteChain<'a> {
        RouteChain {
            routes: &self.routes,
            logger,
            pos: 0,
            done: false,
        }
    }

    /// Level gate of the resolved route
    pub fn is_enabled(&self, logger: &str, level: LogLevel) -> bool {
        level >= self.resolve(logger).level
    }

    /// Appender references an event would reach, ignoring filters
    pub fn match_refs<'a>(&'a self, logger: &'a str, level: LogLevel) -> Vec<&'a AppenderRef> {
        if !self.is_enabled(logger, level) {
            return Vec::new();
        }
        self.route_chain(logger)
            .flat_map(|route| route.refs.iter())
            .filter(|r| r.accepts(level))
            .collect()
    }

    /// Global filter verdict, `Neutral` when no filter decides
    pub fn filter_decision(&self, record: &EventRecord) -> FilterResult {
        self.filters.decide(record)
    }
}

/// Iterator returned by [`Configuration::route_chain`]
pub struct RouteChain<'a> {
    routes: &'a [Route],
    logger: &'a str,
    pos: usize,
    done: bool,
}

impl<'a> Iterator for RouteChain<'a> {
    type Item = &'a Route;

    fn next(&mut self) -> Option<&'a Route> {
        if self.done {
            return None;
        }
        while let Some(route) = self.routes.get(self.pos) {
            self.pos += 1;
            if route.matches(self.logger) {
                self.done = !route.additive;
                return Some(route);
            }
        }
        self.done = true;
        None
    }
}

#[must_use = "builder methods return a new value"]
pub struct ConfigurationBuilder {
    name: String,
    root: Route,
    routes: Vec<Route>,
    filters: FilterChain,
    appenders: HashMap<String, AppenderBinding>,
}

impl ConfigurationBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: Route::new("", LogLevel::Info),
            routes: Vec::new(),
            filters: FilterChain::new(),
            appenders: HashMap::new(),
        }
    }

    /// Level of the root route
    pub fn default_level(mut self, level: LogLevel) -> Self {
        self.root.level = level;
        self
    }

    /// Attach an appender to the root route
    pub fn root_ref(mut self, name: impl Into<String>) -> Self {
        self.root.refs.push(AppenderRef::new(name));
        self
    }

    pub fn root_ref_at(mut self, name: impl Into<String>, level: LogLevel) -> Self {
        self.root.refs.push(AppenderRef::at(name, level));
        self
    }

    /// Add a route; an empty prefix replaces the root route
    pub fn route(mut self, route: Route) -> Self {
        if route.is_root() {
            self.root = route;
        } else {
            self.routes.retain(|r| r.prefix != route.prefix);
            self.routes.push(route);
        }
        self
    }

    pub fn filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters = self.filters.with(filter);
        self
    }

    pub fn appender(
        mut self,
        name: impl Into<String>,
        sink: Arc<dyn AppenderSink>,
        layout: FormatterChain,
    ) -> Self {
        self.appenders.insert(name.into(), AppenderBinding::new(sink, layout));
        self
    }

    /// Register a sink under its own name
    pub fn sink(self, sink: Arc<dyn AppenderSink>, layout: FormatterChain) -> Self {
        let name = sink.name().to_string();
        self.appender(name, sink, layout)
    }

    pub fn build(self) -> Configuration {
        let mut routes = self.routes;
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        let mut root = self.root;
        root.additive = false;
        routes.push(root);
        Configuration {
            name: self.name,
            routes,
            filters: self.filters,
            appenders: self.appenders,
        }
    }
}
