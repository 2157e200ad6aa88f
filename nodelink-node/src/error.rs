use std::any::Any;

use nodelink_common::NameError;
use thiserror::Error;

/// Error types for node operations and handler dispatch
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("invalid name: {0}")]
    NameInvalid(#[from] NameError),

    #[error("failed to decode {type_name}: {reason}")]
    DecodeError { type_name: String, reason: String },

    #[error("failed to encode {type_name}: {reason}")]
    EncodeError { type_name: String, reason: String },

    #[error("type mismatch on [{name}]: expected {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("request to [{0}] timed out")]
    RequestTimedOut(String),

    #[error("request to [{0}] was abandoned")]
    RequestAbandoned(String),

    #[error("topic [{0}] is not advertised by this node")]
    TopicNotAdvertised(String),

    #[error("[{0}] is already advertised by this node")]
    AlreadyAdvertised(String),

    #[error("no replier for service [{0}]")]
    ServiceUnavailable(String),

    #[error("handler fault on [{name}]: {reason}")]
    HandlerFault { name: String, reason: String },

    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl NodeError {
    pub fn type_mismatch(
        name: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        NodeError::TypeMismatch {
            name: name.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn discovery(err: anyhow::Error) -> Self {
        NodeError::Discovery(format!("{err:#}"))
    }

    pub fn transport(err: anyhow::Error) -> Self {
        NodeError::Transport(format!("{err:#}"))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, NodeError::RequestTimedOut(_))
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Result type for nodelink node operations
pub type Result<T> = std::result::Result<T, NodeError>;
