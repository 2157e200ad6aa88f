// Handler Module
//
// INTENTION:
// The node never knows at compile time which message types its registries will
// hold. Every registration is wrapped in a typed handler that is stored behind
// one of a few small erased traits. Dispatch goes through those traits; a
// handler downcasts or decodes into its own type and refuses anything else.
//
// Three roles exist:
// 1. SubscriptionHandler - receives published messages for a topic
// 2. ReplyHandler        - serves requests for a service
// 3. PendingRequest      - requester-side state of one outstanding call

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{panic_message, NodeError, Result};
use crate::message::Message;

pub mod handler_registry;
pub mod reply_handler;
pub mod request_handler;
pub mod subscription_handler;

pub use handler_registry::HandlerRegistry;
pub use reply_handler::{ReplyHandler, TypedReplyHandler};
pub use request_handler::{PendingRequest, ReplyCallback, RequestState};
pub use subscription_handler::{SubscriptionHandler, TypedSubscriptionHandler};

/// Common identity of every registered handler
pub trait Handler: Send + Sync {
    /// Node that owns this handler
    fn node_id(&self) -> &str;

    /// Unique id of this handler instance
    fn handler_id(&self) -> &str;
}

/// A message handed over inside the process without serialization
pub struct LocalMessage<'a> {
    value: &'a dyn Any,
    type_name: &'static str,
}

impl<'a> LocalMessage<'a> {
    pub fn new<T: Message>(value: &'a T) -> Self {
        Self {
            value,
            type_name: T::type_name(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&'a T> {
        let value: &'a dyn Any = self.value;
        value.downcast_ref::<T>()
    }
}

/// Output slot for a reply produced inside the process.
///
/// Wraps an `Option<Rep>` owned by the caller; the reply handler fills it.
pub struct LocalReply<'a> {
    slot: &'a mut dyn Any,
    type_name: &'static str,
}

impl<'a> LocalReply<'a> {
    pub fn new<Rep: Message>(slot: &'a mut Option<Rep>) -> Self {
        Self {
            slot,
            type_name: Rep::type_name(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn accepts<Rep: 'static>(&self) -> bool {
        self.slot.is::<Option<Rep>>()
    }

    /// Store the reply; false if the slot holds a different type
    pub fn fill<Rep: 'static>(&mut self, reply: Rep) -> bool {
        match self.slot.downcast_mut::<Option<Rep>>() {
            Some(slot) => {
                *slot = Some(reply);
                true
            }
            None => false,
        }
    }
}

/// Outcome of a service call that reached a replier
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceReply<Rep> {
    /// The replier handled the request and produced a reply
    Success(Rep),
    /// The replier rejected the request, faulted, or its reply could not be decoded
    Failed,
}

impl<Rep> ServiceReply<Rep> {
    pub fn is_success(&self) -> bool {
        matches!(self, ServiceReply::Success(_))
    }

    pub fn message(&self) -> Option<&Rep> {
        match self {
            ServiceReply::Success(rep) => Some(rep),
            ServiceReply::Failed => None,
        }
    }

    pub fn into_message(self) -> Option<Rep> {
        match self {
            ServiceReply::Success(rep) => Some(rep),
            ServiceReply::Failed => None,
        }
    }
}

/// Run user code, turning a panic into a `HandlerFault` for `name`
pub(crate) fn catch_fault<R>(name: &str, f: impl FnOnce() -> R) -> Result<R> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| NodeError::HandlerFault {
        name: name.to_string(),
        reason: panic_message(payload.as_ref()),
    })
}
