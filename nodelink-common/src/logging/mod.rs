// Logging utilities for the nodelink system
//
// This module provides a small structured logging layer over the `log` facade:
// - Component-based prefixes so registry, node and collaborator output can be told apart
// - Node ID tracking through logger inheritance
// - Optional topic/service tracing on a derived logger
// - Every record carries its component as the `log` target, so a LoggingConfig
//   can give each component its own level

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fmt::{self, Arguments, Display, Formatter};
use std::sync::Once;

/// Predefined components for logging categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Node,
    Context,
    Registry,
    Service,
    Discovery,
    Transport,
    Custom(&'static str),
}

impl Component {
    /// Get the string representation of the component
    pub fn as_str(&self) -> &str {
        match self {
            Component::Node => "Node",
            Component::Context => "Context",
            Component::Registry => "Registry",
            Component::Service => "Service",
            Component::Discovery => "Discovery",
            Component::Transport => "Transport",
            Component::Custom(name) => name,
        }
    }

    /// `log` target of records written for this component
    pub fn target(&self) -> &'static str {
        match self {
            Component::Node => "nodelink::node",
            Component::Context => "nodelink::context",
            Component::Registry => "nodelink::registry",
            Component::Service => "nodelink::service",
            Component::Discovery => "nodelink::discovery",
            Component::Transport => "nodelink::transport",
            Component::Custom(name) => *name,
        }
    }
}

// Lightweight Display helpers to avoid prefix String allocations
struct ComponentPrefixDisplay {
    parent: Option<Component>,
    component: Component,
}

impl Display for ComponentPrefixDisplay {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.parent {
            Some(parent) if parent != Component::Node => {
                write!(f, "{}.{}", parent.as_str(), self.component.as_str())
            }
            _ => write!(f, "{}", self.component.as_str()),
        }
    }
}

struct MaybeTopicDisplay<'a>(Option<&'a str>);

impl Display for MaybeTopicDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(topic) = self.0 {
            write!(f, "|topic={topic}")
        } else {
            Ok(())
        }
    }
}

/// A helper for creating component-specific loggers with node ID tracking
#[derive(Clone, Debug)]
pub struct Logger {
    /// Component this logger is for
    component: Component,
    /// Node ID (or context id) for tracing across nodes sharing a process
    node_id: String,
    /// Parent component for hierarchical logging (if any)
    parent_component: Option<Component>,
    /// Topic or service name being traced
    topic: Option<String>,
}

impl Logger {
    /// Create a new root logger for a specific component and node ID
    pub fn new_root(component: Component, node_id: &str) -> Self {
        Self {
            component,
            node_id: node_id.to_string(),
            parent_component: None,
            topic: None,
        }
    }

    /// Create a child logger with the same node ID but different component
    pub fn with_component(&self, component: Component) -> Self {
        Self {
            component,
            node_id: self.node_id.clone(),
            parent_component: Some(self.component),
            topic: self.topic.clone(),
        }
    }

    /// Create a logger that tags every line with a topic or service name
    pub fn with_topic(&self, topic: impl Into<String>) -> Self {
        Self {
            component: self.component,
            node_id: self.node_id.clone(),
            parent_component: self.parent_component,
            topic: Some(topic.into()),
        }
    }

    /// Get a reference to the node ID
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Get the component of this logger
    pub fn component(&self) -> Component {
        self.component
    }

    /// Get the traced topic if available
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    fn target(&self) -> &'static str {
        self.component.target()
    }

    fn is_root_node(&self) -> bool {
        self.component == Component::Node && self.parent_component.is_none()
    }

    fn prefix(&self) -> ComponentPrefixDisplay {
        ComponentPrefixDisplay {
            parent: self.parent_component,
            component: self.component,
        }
    }

    /// Log a debug message
    pub fn debug(&self, message: impl Into<String>) {
        if log::log_enabled!(target: self.target(), log::Level::Debug) {
            self.debug_args(format_args!("{}", message.into()));
        }
    }

    /// Log a debug message using fmt::Arguments (avoids allocating message String)
    pub fn debug_args(&self, args: Arguments) {
        if log::log_enabled!(target: self.target(), log::Level::Debug) {
            if self.is_root_node() && self.topic.is_none() {
                debug!(target: self.target(), "[{}] {}", self.node_id, args);
            } else {
                debug!(
                    target: self.target(),
                    "[{}][{}{}] {}",
                    self.node_id,
                    self.prefix(),
                    MaybeTopicDisplay(self.topic()),
                    args
                );
            }
        }
    }

    /// Log an info message
    pub fn info(&self, message: impl Into<String>) {
        if log::log_enabled!(target: self.target(), log::Level::Info) {
            self.info_args(format_args!("{}", message.into()));
        }
    }

    /// Log an info message using fmt::Arguments
    pub fn info_args(&self, args: Arguments) {
        if log::log_enabled!(target: self.target(), log::Level::Info) {
            if self.is_root_node() && self.topic.is_none() {
                info!(target: self.target(), "[{}] {}", self.node_id, args);
            } else {
                info!(
                    target: self.target(),
                    "[{}][{}{}] {}",
                    self.node_id,
                    self.prefix(),
                    MaybeTopicDisplay(self.topic()),
                    args
                );
            }
        }
    }

    /// Log a warning message
    pub fn warn(&self, message: impl Into<String>) {
        if log::log_enabled!(target: self.target(), log::Level::Warn) {
            self.warn_args(format_args!("{}", message.into()));
        }
    }

    /// Log a warning using fmt::Arguments
    pub fn warn_args(&self, args: Arguments) {
        if log::log_enabled!(target: self.target(), log::Level::Warn) {
            if self.is_root_node() && self.topic.is_none() {
                warn!(target: self.target(), "[{}] {}", self.node_id, args);
            } else {
                warn!(
                    target: self.target(),
                    "[{}][{}{}] {}",
                    self.node_id,
                    self.prefix(),
                    MaybeTopicDisplay(self.topic()),
                    args
                );
            }
        }
    }

    /// Log an error message
    pub fn error(&self, message: impl Into<String>) {
        if log::log_enabled!(target: self.target(), log::Level::Error) {
            self.error_args(format_args!("{}", message.into()));
        }
    }

    /// Log an error using fmt::Arguments
    pub fn error_args(&self, args: Arguments) {
        if log::log_enabled!(target: self.target(), log::Level::Error) {
            if self.is_root_node() && self.topic.is_none() {
                error!(target: self.target(), "[{}] {}", self.node_id, args);
            } else {
                error!(
                    target: self.target(),
                    "[{}][{}{}] {}",
                    self.node_id,
                    self.prefix(),
                    MaybeTopicDisplay(self.topic()),
                    args
                );
            }
        }
    }
}

/// Log levels understood by LoggingConfig
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Key used for per-component level overrides
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComponentKey {
    Node,
    Context,
    Registry,
    Service,
    Discovery,
    Transport,
    Custom(String),
}

impl From<Component> for ComponentKey {
    fn from(component: Component) -> Self {
        match component {
            Component::Node => ComponentKey::Node,
            Component::Context => ComponentKey::Context,
            Component::Registry => ComponentKey::Registry,
            Component::Service => ComponentKey::Service,
            Component::Discovery => ComponentKey::Discovery,
            Component::Transport => ComponentKey::Transport,
            Component::Custom(name) => ComponentKey::Custom(name.to_string()),
        }
    }
}

impl ComponentKey {
    /// `log` target the override applies to
    pub fn target(&self) -> &str {
        match self {
            ComponentKey::Node => Component::Node.target(),
            ComponentKey::Context => Component::Context.target(),
            ComponentKey::Registry => Component::Registry.target(),
            ComponentKey::Service => Component::Service.target(),
            ComponentKey::Discovery => Component::Discovery.target(),
            ComponentKey::Transport => Component::Transport.target(),
            ComponentKey::Custom(name) => name,
        }
    }
}

/// Logging configuration applied when a node or context is created
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub default_level: LogLevel,
    pub component_levels: HashMap<ComponentKey, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::default_info()
    }
}

static ENV_LOGGER_INIT: Once = Once::new();

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default_info()
    }

    pub fn default_info() -> Self {
        Self {
            default_level: LogLevel::Info,
            component_levels: HashMap::new(),
        }
    }

    pub fn with_default_level(mut self, level: LogLevel) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_component_level(mut self, component: Component, level: LogLevel) -> Self {
        self.component_levels.insert(component.into(), level);
        self
    }

    /// Apply this configuration to the global `log` max level.
    ///
    /// The facade only has a single global filter, so the most verbose of the
    /// default and component levels wins there; the per-component split is
    /// done by the logger `init_env_logger` installs.
    pub fn apply(&self) {
        let max = self
            .component_levels
            .values()
            .copied()
            .fold(self.default_level, std::cmp::max);
        log::set_max_level(max.to_level_filter());
    }

    /// env_logger builder filtering by the default level, with one module
    /// filter per component override
    pub fn env_logger_builder(&self) -> env_logger::Builder {
        let mut builder = env_logger::Builder::from_default_env();
        builder.filter_level(self.default_level.to_level_filter());
        for (component, level) in &self.component_levels {
            builder.filter_module(component.target(), level.to_level_filter());
        }
        builder.is_test(cfg!(test));
        builder
    }

    /// Install env_logger (once per process) and apply this configuration.
    pub fn init_env_logger(&self) {
        ENV_LOGGER_INIT.call_once(|| {
            // Another logger may already be installed by the host application.
            let _ = self.env_logger_builder().try_init();
        });
        self.apply();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_prefix() {
        let root = Logger::new_root(Component::Node, "node-1");
        let registry = root.with_component(Component::Registry);
        let nested = registry.with_component(Component::Custom("Subscriptions"));

        assert_eq!(format!("{}", root.prefix()), "Node");
        assert_eq!(format!("{}", registry.prefix()), "Registry");
        assert_eq!(format!("{}", nested.prefix()), "Registry.Subscriptions");
    }

    #[test]
    fn test_topic_tracing_is_inherited() {
        let logger = Logger::new_root(Component::Node, "node-1").with_topic("/foo");
        let child = logger.with_component(Component::Service);
        assert_eq!(child.topic(), Some("/foo"));
        assert_eq!(child.node_id(), "node-1");
        assert_eq!(
            format!("{}", MaybeTopicDisplay(child.topic())),
            "|topic=/foo"
        );
    }

    #[test]
    fn test_component_level_override() {
        use log::{Level, Log, Metadata};

        let config = LoggingConfig::new()
            .with_default_level(LogLevel::Warn)
            .with_component_level(Component::Registry, LogLevel::Debug);
        let logger = config.env_logger_builder().build();
        let enabled = |component: Component, level: Level| {
            logger.enabled(
                &Metadata::builder()
                    .target(component.target())
                    .level(level)
                    .build(),
            )
        };

        assert!(enabled(Component::Registry, Level::Debug));
        assert!(!enabled(Component::Node, Level::Debug));
        assert!(!enabled(Component::Transport, Level::Info));
        assert!(enabled(Component::Transport, Level::Warn));
    }

    #[test]
    fn test_child_logger_uses_its_own_target() {
        let root = Logger::new_root(Component::Node, "node-1");
        let registry = root.with_component(Component::Registry);
        assert_eq!(root.target(), "nodelink::node");
        assert_eq!(registry.target(), "nodelink::registry");
        assert_eq!(
            ComponentKey::from(Component::Custom("bench")).target(),
            "bench"
        );
    }
}
