// Subscription Handler
//
// INTENTION:
// Wrap a user callback for one message type so it can live in the shared
// subscription registry next to callbacks of any other type. A published
// message reaches the callback in one of two ways:
// - by reference, when the publisher lives in the same process (no encoding)
// - as bytes, when the message came in through a transport
//
// Either path refuses a message of the wrong type instead of miscasting it,
// and a panicking callback is reported as a fault rather than unwinding into
// the dispatcher.

use std::marker::PhantomData;

use nodelink_common::Logger;
use uuid::Uuid;

use super::{catch_fault, Handler, LocalMessage};
use crate::error::{NodeError, Result};
use crate::message::Message;

/// Type-erased view of a subscription callback
pub trait SubscriptionHandler: Handler {
    /// Type name of the messages this handler accepts
    fn msg_type(&self) -> &'static str;

    /// Deliver a message produced inside this process
    fn run_local(&self, topic: &str, msg: &LocalMessage<'_>) -> Result<()>;

    /// Decode `bytes` and deliver the result
    fn run_from_bytes(&self, topic: &str, bytes: &[u8]) -> Result<()>;
}

type SubscriptionCallback<T> = Box<dyn Fn(&str, &T) + Send + Sync>;

pub struct TypedSubscriptionHandler<T: Message> {
    node_id: String,
    handler_id: String,
    callback: SubscriptionCallback<T>,
    logger: Logger,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Message> TypedSubscriptionHandler<T> {
    pub fn new<F>(node_id: impl Into<String>, callback: F, logger: &Logger) -> Self
    where
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        Self {
            node_id: node_id.into(),
            handler_id: Uuid::new_v4().to_string(),
            callback: Box::new(callback),
            logger: logger.clone(),
            _marker: PhantomData,
        }
    }

    fn invoke(&self, topic: &str, msg: &T) -> Result<()> {
        catch_fault(topic, || (self.callback)(topic, msg)).map_err(|err| {
            self.logger.error_args(format_args!(
                "subscriber {} faulted on [{topic}]: {err}",
                self.handler_id
            ));
            err
        })
    }
}

impl<T: Message> Handler for TypedSubscriptionHandler<T> {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn handler_id(&self) -> &str {
        &self.handler_id
    }
}

impl<T: Message> SubscriptionHandler for TypedSubscriptionHandler<T> {
    fn msg_type(&self) -> &'static str {
        T::type_name()
    }

    fn run_local(&self, topic: &str, msg: &LocalMessage<'_>) -> Result<()> {
        let typed = msg
            .downcast_ref::<T>()
            .ok_or_else(|| NodeError::type_mismatch(topic, T::type_name(), msg.type_name()))?;
        self.invoke(topic, typed)
    }

    fn run_from_bytes(&self, topic: &str, bytes: &[u8]) -> Result<()> {
        let msg = T::decode(bytes).map_err(|err| {
            self.logger
                .error_args(format_args!("dropping message on [{topic}]: {err}"));
            err
        })?;
        self.invoke(topic, &msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodelink_common::Component;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn logger() -> Logger {
        Logger::new_root(Component::Service, "test-node")
    }

    fn recording_handler() -> (TypedSubscriptionHandler<String>, Arc<Mutex<Vec<(String, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = TypedSubscriptionHandler::new(
            "test-node",
            move |topic: &str, msg: &String| sink.lock().push((topic.to_string(), msg.clone())),
            &logger(),
        );
        (handler, seen)
    }

    #[test]
    fn test_local_delivery_skips_encoding() {
        let (handler, seen) = recording_handler();
        let msg = "hello".to_string();

        handler.run_local("/chatter", &LocalMessage::new(&msg)).unwrap();

        assert_eq!(
            seen.lock().as_slice(),
            &[("/chatter".to_string(), "hello".to_string())]
        );
    }

    #[test]
    fn test_local_type_mismatch_does_not_invoke() {
        let (handler, seen) = recording_handler();
        let wrong = 7u64;

        let err = handler
            .run_local("/chatter", &LocalMessage::new(&wrong))
            .unwrap_err();

        assert!(matches!(err, NodeError::TypeMismatch { .. }));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_bytes_delivery_and_decode_error() {
        let (handler, seen) = recording_handler();
        let bytes = "from afar".to_string().encode().unwrap();

        handler.run_from_bytes("/chatter", &bytes).unwrap();
        let err = handler.run_from_bytes("/chatter", &[0xff, 0xff]).unwrap_err();

        assert!(matches!(err, NodeError::DecodeError { .. }));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].1, "from afar");
    }

    #[test]
    fn test_panicking_callback_becomes_fault() {
        let handler = TypedSubscriptionHandler::new(
            "test-node",
            |_: &str, _: &String| panic!("subscriber blew up"),
            &logger(),
        );
        let msg = "x".to_string();

        let err = handler.run_local("/chatter", &LocalMessage::new(&msg)).unwrap_err();

        assert!(matches!(err, NodeError::HandlerFault { .. }));
    }

    #[test]
    fn test_handler_ids_are_unique() {
        let (a, _) = recording_handler();
        let (b, _) = recording_handler();
        assert_ne!(a.handler_id(), b.handler_id());
        assert_eq!(a.node_id(), "test-node");
        assert_eq!(a.msg_type(), <String as Message>::type_name());
    }
}
