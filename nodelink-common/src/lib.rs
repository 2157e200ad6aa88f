//! Nodelink Common
//!
//! Common utilities for the nodelink messaging stack.
//!
//! This crate provides:
//! - Component-based structured logging with node ID context
//! - Logging configuration (default level plus per-component overrides)
//! - Topic and service name validation

pub mod logging;
pub mod routing;

// Re-export traits and types at the root level
pub use logging::{Component, ComponentKey, LogLevel, Logger, LoggingConfig};
pub use routing::{NameError, TopicName};
