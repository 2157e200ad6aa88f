// Request Handler (requester side)
//
// INTENTION:
// Track one outstanding service call that could not be served inside the
// process. The request bytes wait here until a replier address is known, and
// the reply lands here when it comes back.
//
// State machine:
//
//   Created -> AwaitingReply -> Completed
//                            -> TimedOut
//                            -> Abandoned
//
// Every terminal transition happens under the slot lock and only from a
// non-terminal state, so completion is signaled at most once and a reply that
// arrives after a timeout or abandonment is ignored. A blocking caller parks
// on the condition variable; the state is re-checked under the same lock,
// so a reply that lands before the caller starts waiting is not missed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use nodelink_common::{Logger, TopicName};
use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use super::{catch_fault, Handler};
use crate::network::RequestFrame;

/// Completion callback of a non-blocking request: (service, reply bytes, success)
pub type ReplyCallback = Box<dyn FnOnce(&str, &[u8], bool) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Created,
    AwaitingReply,
    Completed,
    TimedOut,
    Abandoned,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::TimedOut | RequestState::Abandoned
        )
    }
}

struct ReplySlot {
    state: RequestState,
    success: bool,
    reply: Vec<u8>,
}

pub struct PendingRequest {
    service: TopicName,
    node_id: String,
    handler_id: String,
    request: Vec<u8>,
    req_type: &'static str,
    rep_type: &'static str,
    /// Set once the request has been handed to a transport
    sent: AtomicBool,
    slot: Mutex<ReplySlot>,
    signal: Condvar,
    callback: Mutex<Option<ReplyCallback>>,
    logger: Logger,
}

impl PendingRequest {
    pub fn new(
        service: TopicName,
        node_id: impl Into<String>,
        request: Vec<u8>,
        req_type: &'static str,
        rep_type: &'static str,
        logger: &Logger,
    ) -> Self {
        let logger = logger.with_topic(service.as_str());
        Self {
            service,
            node_id: node_id.into(),
            handler_id: Uuid::new_v4().to_string(),
            request,
            req_type,
            rep_type,
            sent: AtomicBool::new(false),
            slot: Mutex::new(ReplySlot {
                state: RequestState::Created,
                success: false,
                reply: Vec::new(),
            }),
            signal: Condvar::new(),
            callback: Mutex::new(None),
            logger,
        }
    }

    /// Attach the callback run when the reply arrives
    pub fn with_callback(self, callback: ReplyCallback) -> Self {
        *self.callback.lock() = Some(callback);
        self
    }

    pub fn service(&self) -> &TopicName {
        &self.service
    }

    pub fn req_type(&self) -> &'static str {
        self.req_type
    }

    pub fn rep_type(&self) -> &'static str {
        self.rep_type
    }

    pub fn state(&self) -> RequestState {
        self.slot.lock().state
    }

    /// The request is registered and waiting for a replier
    pub fn mark_awaiting(&self) {
        let mut slot = self.slot.lock();
        if slot.state == RequestState::Created {
            slot.state = RequestState::AwaitingReply;
        }
    }

    /// Store the reply and wake the waiter.
    ///
    /// Returns false if the request already reached a terminal state; the
    /// reply is dropped in that case.
    pub fn complete(&self, reply: Vec<u8>, success: bool) -> bool {
        let (callback, reply) = {
            let mut slot = self.slot.lock();
            if slot.state.is_terminal() {
                self.logger.debug_args(format_args!(
                    "discarding reply for request {} in state {:?}",
                    self.handler_id, slot.state
                ));
                return false;
            }
            slot.state = RequestState::Completed;
            slot.success = success;
            let callback = self.callback.lock().take();
            let reply = match callback {
                Some(_) => reply,
                None => {
                    slot.reply = reply;
                    Vec::new()
                }
            };
            self.signal.notify_all();
            (callback, reply)
        };

        if let Some(callback) = callback {
            let service = self.service.as_str();
            if let Err(err) = catch_fault(service, || callback(service, &reply, success)) {
                self.logger.error_args(format_args!("reply callback: {err}"));
            }
        }
        true
    }

    /// Park until the request is completed or `deadline` passes.
    ///
    /// Returns true only if the request completed.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut slot = self.slot.lock();
        while !slot.state.is_terminal() {
            if self.signal.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.state == RequestState::Completed
    }

    /// Give up waiting. Returns false if the request completed first.
    pub fn mark_timed_out(&self) -> bool {
        self.finish(RequestState::TimedOut)
    }

    /// The owning node went away; the callback is dropped without running
    pub fn abandon(&self) -> bool {
        self.finish(RequestState::Abandoned)
    }

    fn finish(&self, state: RequestState) -> bool {
        let callback = {
            let mut slot = self.slot.lock();
            if slot.state.is_terminal() {
                return false;
            }
            slot.state = state;
            self.signal.notify_all();
            self.callback.lock().take()
        };
        drop(callback);
        self.logger.debug_args(format_args!(
            "request {} finished as {state:?}",
            self.handler_id
        ));
        true
    }

    /// Success flag and reply bytes, once completed
    pub fn reply(&self) -> Option<(bool, Vec<u8>)> {
        let slot = self.slot.lock();
        (slot.state == RequestState::Completed).then(|| (slot.success, slot.reply.clone()))
    }

    /// Claim the request for sending. Returns false if it was already sent.
    pub fn mark_sent(&self) -> bool {
        !self.sent.swap(true, Ordering::AcqRel)
    }

    /// Allow another send attempt after a failed one
    pub fn reset_sent(&self) {
        self.sent.store(false, Ordering::Release);
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }

    /// Wire frame for this request; the reply goes back to `reply_address`
    pub fn frame(&self, reply_address: &str) -> RequestFrame {
        RequestFrame {
            service: self.service.as_str().to_string(),
            handler_id: self.handler_id.clone(),
            node_id: self.node_id.clone(),
            req_type: self.req_type.to_string(),
            rep_type: self.rep_type.to_string(),
            payload: self.request.clone(),
            reply_address: reply_address.to_string(),
        }
    }
}

impl Handler for PendingRequest {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn handler_id(&self) -> &str {
        &self.handler_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodelink_common::Component;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn pending() -> PendingRequest {
        PendingRequest::new(
            TopicName::new("/echo").unwrap(),
            "caller",
            vec![1, 2, 3],
            "req",
            "rep",
            &Logger::new_root(Component::Node, "caller"),
        )
    }

    #[test]
    fn test_complete_is_signaled_once() {
        let request = pending();
        request.mark_awaiting();
        assert_eq!(request.state(), RequestState::AwaitingReply);

        assert!(request.complete(vec![9], true));
        assert!(!request.complete(vec![8], false));

        assert_eq!(request.reply(), Some((true, vec![9])));
        assert!(!request.mark_timed_out());
    }

    #[test]
    fn test_wait_wakes_on_reply() {
        let request = Arc::new(pending());
        request.mark_awaiting();

        let replier = Arc::clone(&request);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            replier.complete(vec![4, 2], true)
        });

        let started = Instant::now();
        assert!(request.wait_until(started + Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_reply_before_wait_is_not_missed() {
        let request = pending();
        request.complete(vec![1], true);
        assert!(request.wait_until(Instant::now() + Duration::from_millis(10)));
    }

    #[test]
    fn test_late_reply_after_timeout_is_dropped() {
        let request = pending();
        request.mark_awaiting();

        let deadline = Instant::now() + Duration::from_millis(30);
        assert!(!request.wait_until(deadline));
        assert!(Instant::now() >= deadline);
        assert!(request.mark_timed_out());

        assert!(!request.complete(vec![1], true));
        assert_eq!(request.state(), RequestState::TimedOut);
        assert!(request.reply().is_none());
    }

    #[test]
    fn test_callback_runs_once_and_abandon_drops_it() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&hits);
        let request = pending().with_callback(Box::new(move |service, bytes, ok| {
            sink.lock().push((service.to_string(), bytes.to_vec(), ok));
        }));
        assert!(request.complete(vec![7], true));
        assert!(!request.complete(vec![7], true));
        assert_eq!(hits.lock().as_slice(), &[("/echo".to_string(), vec![7], true)]);

        let dropped = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&dropped);
        let abandoned = pending().with_callback(Box::new(move |_, _, _| *counter.lock() += 1));
        assert!(abandoned.abandon());
        assert!(!abandoned.complete(vec![], true));
        assert_eq!(*dropped.lock(), 0);
    }

    #[test]
    fn test_sent_flag_and_frame() {
        let request = pending();
        assert!(request.mark_sent());
        assert!(!request.mark_sent());
        request.reset_sent();
        assert!(!request.is_sent());

        let frame = request.frame("mem://caller");
        assert_eq!(frame.service, "/echo");
        assert_eq!(frame.handler_id, request.handler_id());
        assert_eq!(frame.payload, vec![1, 2, 3]);
        assert_eq!(frame.reply_address, "mem://caller");
    }
}
