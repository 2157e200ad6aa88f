// Reply Handler
//
// INTENTION:
// Service-side wrapper around a user function `Fn(&Req) -> anyhow::Result<Rep>`.
// `Ok` is a successful call, `Err` is a rejected one. Two entry points:
// - run_local: typed request in, typed reply out, used when the caller shares
//   the process with the replier
// - run_from_bytes: decode, invoke, encode, used for calls that came in
//   through a transport
//
// A request that does not decode never reaches the user function. A panic
// inside the user function is reported as a failed call.

use std::marker::PhantomData;

use nodelink_common::Logger;
use uuid::Uuid;

use super::{catch_fault, Handler, LocalMessage, LocalReply};
use crate::error::{NodeError, Result};
use crate::message::Message;

/// Type-erased view of a service replier
pub trait ReplyHandler: Handler {
    fn req_type(&self) -> &'static str;

    fn rep_type(&self) -> &'static str;

    /// Serve a request from inside the process. Returns the success flag.
    fn run_local(
        &self,
        service: &str,
        request: &LocalMessage<'_>,
        reply: &mut LocalReply<'_>,
    ) -> Result<bool>;

    /// Serve an encoded request. Returns the encoded reply and the success flag.
    fn run_from_bytes(&self, service: &str, request: &[u8]) -> Result<(Vec<u8>, bool)>;
}

type ReplyFn<Req, Rep> = Box<dyn Fn(&Req) -> anyhow::Result<Rep> + Send + Sync>;

pub struct TypedReplyHandler<Req: Message, Rep: Message> {
    node_id: String,
    handler_id: String,
    func: ReplyFn<Req, Rep>,
    logger: Logger,
    _marker: PhantomData<fn(&Req) -> Rep>,
}

impl<Req: Message, Rep: Message> TypedReplyHandler<Req, Rep> {
    pub fn new<F>(node_id: impl Into<String>, func: F, logger: &Logger) -> Self
    where
        F: Fn(&Req) -> anyhow::Result<Rep> + Send + Sync + 'static,
    {
        Self {
            node_id: node_id.into(),
            handler_id: Uuid::new_v4().to_string(),
            func: Box::new(func),
            logger: logger.clone(),
            _marker: PhantomData,
        }
    }

    /// Run the user function; `None` is a failed call
    fn invoke(&self, service: &str, request: &Req) -> Option<Rep> {
        match catch_fault(service, || (self.func)(request)) {
            Ok(Ok(reply)) => Some(reply),
            Ok(Err(err)) => {
                self.logger
                    .warn_args(format_args!("service [{service}] rejected request: {err:#}"));
                None
            }
            Err(fault) => {
                self.logger.error_args(format_args!("{fault}"));
                None
            }
        }
    }
}

impl<Req: Message, Rep: Message> Handler for TypedReplyHandler<Req, Rep> {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn handler_id(&self) -> &str {
        &self.handler_id
    }
}

impl<Req: Message, Rep: Message> ReplyHandler for TypedReplyHandler<Req, Rep> {
    fn req_type(&self) -> &'static str {
        Req::type_name()
    }

    fn rep_type(&self) -> &'static str {
        Rep::type_name()
    }

    fn run_local(
        &self,
        service: &str,
        request: &LocalMessage<'_>,
        reply: &mut LocalReply<'_>,
    ) -> Result<bool> {
        let typed = request.downcast_ref::<Req>().ok_or_else(|| {
            NodeError::type_mismatch(service, Req::type_name(), request.type_name())
        })?;
        if !reply.accepts::<Rep>() {
            return Err(NodeError::type_mismatch(
                service,
                Rep::type_name(),
                reply.type_name(),
            ));
        }

        match self.invoke(service, typed) {
            Some(rep) => Ok(reply.fill(rep)),
            None => Ok(false),
        }
    }

    fn run_from_bytes(&self, service: &str, request: &[u8]) -> Result<(Vec<u8>, bool)> {
        let typed = Req::decode(request)?;
        match self.invoke(service, &typed) {
            Some(rep) => Ok((rep.encode()?, true)),
            None => Ok((Vec::new(), false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use nodelink_common::Component;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn logger() -> Logger {
        Logger::new_root(Component::Service, "replier")
    }

    fn doubler() -> TypedReplyHandler<i32, i64> {
        TypedReplyHandler::new("replier", |req: &i32| Ok(i64::from(*req) * 2), &logger())
    }

    #[test]
    fn test_run_local_fills_reply() {
        let handler = doubler();
        let mut slot: Option<i64> = None;

        let ok = handler
            .run_local("/double", &LocalMessage::new(&21i32), &mut LocalReply::new(&mut slot))
            .unwrap();

        assert!(ok);
        assert_eq!(slot, Some(42));
    }

    #[test]
    fn test_run_local_rejects_wrong_types() {
        let handler = doubler();

        let mut slot: Option<i64> = None;
        let err = handler
            .run_local("/double", &LocalMessage::new(&"no".to_string()), &mut LocalReply::new(&mut slot))
            .unwrap_err();
        assert!(matches!(err, NodeError::TypeMismatch { .. }));

        let mut wrong_slot: Option<String> = None;
        let err = handler
            .run_local("/double", &LocalMessage::new(&1i32), &mut LocalReply::new(&mut wrong_slot))
            .unwrap_err();
        assert!(matches!(err, NodeError::TypeMismatch { .. }));
        assert!(wrong_slot.is_none());
    }

    #[test]
    fn test_run_from_bytes_round_trip() {
        let handler = doubler();
        let (bytes, ok) = handler
            .run_from_bytes("/double", &5i32.encode().unwrap())
            .unwrap();
        assert!(ok);
        assert_eq!(i64::decode(&bytes).unwrap(), 10);
    }

    #[test]
    fn test_decode_failure_skips_user_function() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler: TypedReplyHandler<String, String> = TypedReplyHandler::new(
            "replier",
            move |req: &String| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(req.clone())
            },
            &logger(),
        );

        let err = handler.run_from_bytes("/echo", &[0xff]).unwrap_err();

        assert!(matches!(err, NodeError::DecodeError { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rejection_and_panic_are_failed_calls() {
        let rejecting: TypedReplyHandler<i32, i32> =
            TypedReplyHandler::new("replier", |_: &i32| Err(anyhow!("not today")), &logger());
        let (bytes, ok) = rejecting
            .run_from_bytes("/reject", &1i32.encode().unwrap())
            .unwrap();
        assert!(!ok);
        assert!(bytes.is_empty());

        let panicking: TypedReplyHandler<i32, i32> =
            TypedReplyHandler::new("replier", |_: &i32| panic!("replier crashed"), &logger());
        let mut slot: Option<i32> = None;
        let ok = panicking
            .run_local("/panic", &LocalMessage::new(&1i32), &mut LocalReply::new(&mut slot))
            .unwrap();
        assert!(!ok);
        assert!(slot.is_none());
    }
}
