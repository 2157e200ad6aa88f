//! Nodelink Node
//!
//! Typed publish/subscribe and request/reply between nodes that do not know
//! each other's location in advance.
//!
//! This crate provides:
//! - The `Node` façade: advertise, subscribe, publish, and service calls in
//!   callback, blocking and async form
//! - The shared `Context` holding the handler registries of a process
//! - Discovery and transport seams with in-memory implementations

// Public modules
pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod network;
pub mod node;
pub mod services;

// Re-export the main types from the node module
pub use node::{Node, NodeConfig, Publisher};

pub use config::ContextConfig;
pub use context::Context;
pub use error::{NodeError, Result};
pub use message::Message;
pub use network::{AdvertiseKind, Advertisement, MemoryNetwork, Scope};
pub use services::ServiceReply;

pub use nodelink_common::{LogLevel, LoggingConfig, TopicName};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
