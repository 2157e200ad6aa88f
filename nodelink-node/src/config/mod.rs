// Configuration Module
//
// Configuration of the shared context: the identity of the process it stands
// for and its logging setup. Node-level settings live in `NodeConfig`.
//
// ```rust
// use nodelink_node::config::{ContextConfig, LogLevel, LoggingConfig};
//
// let config = ContextConfig::new()
//     .with_host_name("robot-1")
//     .with_logging_config(LoggingConfig::new().with_default_level(LogLevel::Debug));
// ```

use std::fmt;

use uuid::Uuid;

// Re-export configuration types from nodelink_common::logging
pub use nodelink_common::logging::{ComponentKey, LogLevel, LoggingConfig};

/// Environment variable consulted for the host name
const HOST_ENV: &str = "HOSTNAME";
const DEFAULT_HOST: &str = "localhost";

#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Identity of the process this context represents
    pub process_id: String,
    /// Host the context runs on, used for host-scoped visibility
    pub host_name: String,
    pub logging_config: Option<LoggingConfig>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextConfig {
    pub fn new() -> Self {
        let host_name = std::env::var(HOST_ENV)
            .ok()
            .filter(|host| !host.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        Self {
            process_id: Uuid::new_v4().to_string(),
            host_name,
            logging_config: None,
        }
    }

    pub fn with_process_id(mut self, process_id: impl Into<String>) -> Self {
        self.process_id = process_id.into();
        self
    }

    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }

    pub fn with_logging_config(mut self, logging_config: LoggingConfig) -> Self {
        self.logging_config = Some(logging_config);
        self
    }
}

impl fmt::Display for ContextConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextConfig: process={} host={}", self.process_id, self.host_name)
    }
}
