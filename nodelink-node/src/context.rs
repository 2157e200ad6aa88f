// Context Module
//
// INTENTION:
// Process-wide state shared by every node of one process: the subscription,
// replier and pending-request registries, the discovery and transport
// collaborators, and the coarse reentrant lock nodes take while changing their
// bookkeeping. Nodes tag their registry entries with their own id so they can
// remove exactly what they registered.
//
// Inbound traffic enters through `handle_frame` on transport threads. That
// path only takes registry locks, never the coarse lock, so a reply can always
// reach a caller that is parked in a blocking request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use nodelink_common::{Component, Logger, TopicName};
use once_cell::sync::OnceCell;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::config::ContextConfig;
use crate::error::{NodeError, Result};
use crate::message::Message;
use crate::network::{
    AdvertiseKind, Discovery, DiscoveryEvent, Frame, MemoryNetwork, PublishFrame, ReplyFrame,
    RequestFrame, Scope, Transport,
};
use crate::services::{
    HandlerRegistry, LocalMessage, PendingRequest, ReplyHandler, SubscriptionHandler,
};

static GLOBAL: OnceCell<Arc<Context>> = OnceCell::new();
static SIGNALLED: AtomicBool = AtomicBool::new(false);
static SIGNAL_HANDLER: OnceCell<()> = OnceCell::new();

pub struct Context {
    process_id: String,
    host: String,
    subscriptions: HandlerRegistry<dyn SubscriptionHandler>,
    repliers: HandlerRegistry<dyn ReplyHandler>,
    requests: HandlerRegistry<PendingRequest>,
    discovery: Arc<dyn Discovery>,
    transport: Arc<dyn Transport>,
    lock: ReentrantMutex<()>,
    interrupted: AtomicBool,
    logger: Logger,
}

impl Context {
    pub fn new(
        config: ContextConfig,
        discovery: Arc<dyn Discovery>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        if let Some(logging_config) = &config.logging_config {
            logging_config.apply();
        }
        let logger = Logger::new_root(Component::Context, &config.process_id);

        let context = Arc::new(Self {
            subscriptions: HandlerRegistry::new(
                "subscription",
                logger.with_component(Component::Registry),
            ),
            repliers: HandlerRegistry::new("replier", logger.with_component(Component::Registry)),
            requests: HandlerRegistry::new("request", logger.with_component(Component::Registry)),
            process_id: config.process_id,
            host: config.host_name,
            discovery,
            transport,
            lock: ReentrantMutex::new(()),
            interrupted: AtomicBool::new(false),
            logger,
        });

        let weak: Weak<Context> = Arc::downgrade(&context);
        context
            .discovery
            .subscribe(Arc::new(move |event| {
                if let Some(ctx) = weak.upgrade() {
                    ctx.on_discovery_event(event);
                }
            }))
            .map_err(NodeError::discovery)?;

        context.logger.info_args(format_args!(
            "context up at {} (host {})",
            context.transport.address(),
            context.host
        ));
        Ok(context)
    }

    /// The process-wide default context, created on first use with the
    /// in-memory collaborators. SIGINT/SIGTERM mark it as interrupted.
    pub fn global() -> Result<Arc<Context>> {
        GLOBAL
            .get_or_try_init(|| {
                install_signal_handler();
                MemoryNetwork::new().create_context(ContextConfig::new())
            })
            .map(Arc::clone)
            .map_err(NodeError::transport)
    }

    /// Coarse lock guarding node bookkeeping. Reentrant on the same thread.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub fn subscriptions(&self) -> &HandlerRegistry<dyn SubscriptionHandler> {
        &self.subscriptions
    }

    pub fn repliers(&self) -> &HandlerRegistry<dyn ReplyHandler> {
        &self.repliers
    }

    pub fn requests(&self) -> &HandlerRegistry<PendingRequest> {
        &self.requests
    }

    pub fn discovery(&self) -> &Arc<dyn Discovery> {
        &self.discovery
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn has_subscribers(&self, topic: &str) -> bool {
        TopicName::new(topic)
            .map(|name| self.subscriptions.has_handlers(&name))
            .unwrap_or(false)
    }

    /// Deliver `msg` to the local subscribers of `topic` by reference and hand
    /// it to the transport when a remote context subscribes.
    ///
    /// Returns the number of local subscribers that took the message. A
    /// failing subscriber is logged and does not stop delivery to the others.
    pub(crate) fn publish<T: Message>(
        &self,
        topic: &TopicName,
        msg: &T,
        scope: Scope,
    ) -> Result<usize> {
        let local = LocalMessage::new(msg);
        let mut delivered = 0;
        for (owner, handler) in self.subscriptions.lookup_all(topic) {
            match handler.run_local(topic.as_str(), &local) {
                Ok(()) => delivered += 1,
                Err(err @ NodeError::TypeMismatch { .. }) => self
                    .logger
                    .warn_args(format_args!("skipping subscriber of {owner}: {err}")),
                Err(err) => self
                    .logger
                    .error_args(format_args!("subscriber of {owner} failed: {err}")),
            }
        }

        if self.transport.has_remote_subscribers(topic.as_str()) {
            let payload = msg.encode()?;
            let sent = self
                .transport
                .publish(topic.as_str(), T::type_name(), &payload, scope)
                .map_err(NodeError::transport)?;
            self.logger
                .debug_args(format_args!("[{topic}] sent to {sent} remote context(s)"));
        }
        Ok(delivered)
    }

    /// Entry point for every frame a transport receives
    pub fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Publish(publish) => self.handle_publish(publish),
            Frame::Request(request) => self.handle_request(request),
            Frame::Reply(reply) => {
                self.dispatch_reply(
                    &reply.service,
                    &reply.handler_id,
                    reply.payload,
                    reply.success,
                );
            }
        }
    }

    fn handle_publish(&self, frame: PublishFrame) {
        let visible = frame.scope.allows(
            &frame.origin_process,
            &frame.origin_host,
            &self.process_id,
            &self.host,
        );
        if !visible {
            self.logger.debug_args(format_args!(
                "[{}] from {} is out of scope {}",
                frame.topic, frame.origin_process, frame.scope
            ));
            return;
        }
        if let Err(err) = self.dispatch_message(&frame.topic, &frame.msg_type, &frame.payload) {
            self.logger
                .error_args(format_args!("inbound message on [{}]: {err}", frame.topic));
        }
    }

    fn handle_request(&self, frame: RequestFrame) {
        let (payload, success) = self.serve_request(&frame);
        let reply = ReplyFrame {
            service: frame.service,
            handler_id: frame.handler_id,
            payload,
            success,
        };
        if let Err(err) = self.transport.send_reply(&frame.reply_address, reply) {
            self.logger.warn_args(format_args!(
                "could not return reply to {}: {err:#}",
                frame.reply_address
            ));
        }
    }

    /// Decode and deliver an encoded message to the local subscribers of `topic`.
    ///
    /// Subscribers of a different message type are skipped. Returns the
    /// number of subscribers reached.
    pub fn dispatch_message(&self, topic: &str, msg_type: &str, payload: &[u8]) -> Result<usize> {
        let topic = TopicName::new(topic)?;
        let mut delivered = 0;
        for (owner, handler) in self.subscriptions.lookup_all(&topic) {
            if handler.msg_type() != msg_type {
                self.logger.warn_args(format_args!(
                    "{}",
                    NodeError::type_mismatch(topic.as_str(), handler.msg_type(), msg_type)
                ));
                continue;
            }
            match handler.run_from_bytes(topic.as_str(), payload) {
                Ok(()) => delivered += 1,
                Err(err) => self
                    .logger
                    .error_args(format_args!("subscriber of {owner} failed: {err}")),
            }
        }
        Ok(delivered)
    }

    /// Local replier of `service` serving exactly these request and reply types
    pub fn replier_for(
        &self,
        service: &TopicName,
        req_type: &str,
        rep_type: &str,
    ) -> Option<Arc<dyn ReplyHandler>> {
        self.repliers.find(service, |replier| {
            replier.req_type() == req_type && replier.rep_type() == rep_type
        })
    }

    /// Serve an encoded request with a local replier of matching types
    pub fn dispatch_request(&self, frame: &RequestFrame) -> Result<(Vec<u8>, bool)> {
        let service = TopicName::new(&frame.service)?;
        if let Some(replier) = self.replier_for(&service, &frame.req_type, &frame.rep_type) {
            return replier.run_from_bytes(service.as_str(), &frame.payload);
        }
        match self.repliers.find(&service, |_| true) {
            Some(replier) if replier.req_type() != frame.req_type => Err(NodeError::type_mismatch(
                service.as_str(),
                replier.req_type(),
                frame.req_type.clone(),
            )),
            Some(replier) => Err(NodeError::type_mismatch(
                service.as_str(),
                replier.rep_type(),
                frame.rep_type.clone(),
            )),
            None => Err(NodeError::ServiceUnavailable(frame.service.clone())),
        }
    }

    /// Outcome of `dispatch_request` as it goes back on the wire
    fn serve_request(&self, frame: &RequestFrame) -> (Vec<u8>, bool) {
        match self.dispatch_request(frame) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.logger
                    .warn_args(format_args!("request for [{}] failed: {err}", frame.service));
                (Vec::new(), false)
            }
        }
    }

    /// Complete the pending request `handler_id` of `service`.
    ///
    /// Returns false when no such request is pending, e.g. it already timed
    /// out; the reply is discarded.
    pub fn dispatch_reply(
        &self,
        service: &str,
        handler_id: &str,
        payload: Vec<u8>,
        success: bool,
    ) -> bool {
        let Ok(service) = TopicName::new(service) else {
            return false;
        };
        match self.requests.remove(&service, handler_id) {
            Some(pending) => pending.complete(payload, success),
            None => {
                self.logger.debug_args(format_args!(
                    "discarding reply for [{service}]: request {handler_id} is not pending"
                ));
                false
            }
        }
    }

    /// Send every unsent pending request for `service` to a replier that can
    /// take it. A replier of this process serves the request right here;
    /// otherwise the request goes to a remote replier discovery knows.
    /// Returns the number of requests sent or served.
    pub fn send_pending_requests(&self, service: &TopicName) -> usize {
        let pending = self.requests.lookup_all(service);
        if pending.is_empty() {
            return 0;
        }
        let remote = self
            .discovery
            .addresses(AdvertiseKind::Service, service.as_str())
            .unwrap_or_default();
        let own_address = self.transport.address();
        let mut sent = 0;
        for (_, request) in pending {
            if self
                .replier_for(service, request.req_type(), request.rep_type())
                .is_some()
            {
                if request.mark_sent() {
                    let frame = request.frame(own_address);
                    let (payload, success) = self.serve_request(&frame);
                    self.dispatch_reply(&frame.service, &frame.handler_id, payload, success);
                    sent += 1;
                }
                continue;
            }

            let target = remote.iter().find(|ad| {
                ad.address != own_address
                    && ad.msg_type == request.req_type()
                    && ad.rep_type.as_deref() == Some(request.rep_type())
            });
            let Some(target) = target else {
                continue;
            };
            if !request.mark_sent() {
                continue;
            }
            match self
                .transport
                .send_request(&target.address, request.frame(own_address))
            {
                Ok(()) => sent += 1,
                Err(err) => {
                    request.reset_sent();
                    self.logger.warn_args(format_args!(
                        "sending request for [{service}] to {} failed: {err:#}",
                        target.address
                    ));
                }
            }
        }
        sent
    }

    fn on_discovery_event(&self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Connected(ad) => {
                if ad.kind != AdvertiseKind::Service {
                    return;
                }
                if let Ok(service) = TopicName::new(&ad.name) {
                    let sent = self.send_pending_requests(&service);
                    if sent > 0 {
                        self.logger.debug_args(format_args!(
                            "replier for [{service}] at {}: flushed {sent} request(s)",
                            ad.address
                        ));
                    }
                }
            }
            DiscoveryEvent::Disconnected(ad) => {
                self.logger.debug_args(format_args!(
                    "{:?} [{}] of {} went away",
                    ad.kind, ad.name, ad.node_id
                ));
            }
        }
    }

    /// True once `interrupt` was called or the process received SIGINT/SIGTERM
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst) || SIGNALLED.load(Ordering::SeqCst)
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.logger.info("interrupted");
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        for request in self.requests.drain() {
            request.abandon();
        }
    }
}

/// Route SIGINT/SIGTERM into the interrupted flag. Installed once per process.
pub fn install_signal_handler() {
    SIGNAL_HANDLER.get_or_init(|| {
        if let Err(err) = ctrlc::set_handler(|| SIGNALLED.store(true, Ordering::SeqCst)) {
            log::warn!("could not install signal handler: {err}");
        }
    });
}
