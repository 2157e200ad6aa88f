// Node Module
//
// INTENTION:
// The public entry point. A node advertises topics and services, subscribes to
// topics, publishes, and calls services either with a callback, blocking with
// a timeout, or as a future. All handler state lives in the shared Context;
// the node only keeps the bookkeeping of what it registered, under its own id,
// and takes everything back down when it is dropped.
//
// Locking: every operation that changes bookkeeping holds the context's
// reentrant lock, and local callbacks run while it is held, so a callback may
// call back into a node on the same thread. A blocking request releases the
// lock before it parks, unless the call is itself nested inside a callback
// that holds it; replies never need the lock, so such a nested call still
// completes or times out.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nodelink_common::{Component, LogLevel, Logger, LoggingConfig, TopicName};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::context::Context;
use crate::error::{NodeError, Result};
use crate::message::Message;
use crate::network::{AdvertiseKind, Advertisement, Scope};
use crate::services::{
    Handler, LocalMessage, LocalReply, PendingRequest, ReplyHandler, ServiceReply,
    SubscriptionHandler, TypedReplyHandler, TypedSubscriptionHandler,
};

/// Configuration for a Node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Log at debug level and install the env_logger backend
    pub verbose: bool,

    /// Logging configuration options
    pub logging_config: Option<LoggingConfig>,

    /// Scope used by `advertise` and `advertise_service`
    pub default_scope: Scope,

    /// Timeout of `request_future` in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self {
            verbose: false,
            logging_config: None,
            default_scope: Scope::All,
            request_timeout_ms: 30000, // 30 seconds
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        if verbose {
            self.logging_config =
                Some(LoggingConfig::new().with_default_level(LogLevel::Debug));
        }
        self
    }

    /// Add logging configuration
    pub fn with_logging_config(mut self, config: LoggingConfig) -> Self {
        self.logging_config = Some(config);
        self
    }

    pub fn with_default_scope(mut self, scope: Scope) -> Self {
        self.default_scope = scope;
        self
    }

    /// Set the request timeout in milliseconds
    pub fn with_request_timeout(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl fmt::Display for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeConfig: verbose:{} scope:{} request_timeout:{}ms",
            self.verbose, self.default_scope, self.request_timeout_ms
        )
    }
}

struct AdvertisedTopic {
    msg_type: &'static str,
    scope: Scope,
    /// Shared with the Publisher handles of this advertisement
    active: Arc<AtomicBool>,
}

struct AdvertisedService {
    req_type: &'static str,
    rep_type: &'static str,
}

#[derive(Default)]
struct NodeState {
    topics_advertised: HashMap<TopicName, AdvertisedTopic>,
    topics_subscribed: Vec<TopicName>,
    services_advertised: HashMap<TopicName, AdvertisedService>,
}

/// Handle returned by `Node::advertise`; publishes on one topic with one type.
///
/// The handle becomes invalid once the topic is unadvertised or the node is
/// dropped.
pub struct Publisher<T: Message> {
    topic: TopicName,
    scope: Scope,
    active: Arc<AtomicBool>,
    context: Arc<Context>,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Message> Publisher<T> {
    pub fn is_valid(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn topic(&self) -> &str {
        self.topic.as_str()
    }

    /// Publish `msg`; returns the number of local subscribers reached
    pub fn publish(&self, msg: &T) -> Result<usize> {
        if !self.is_valid() {
            return Err(NodeError::TopicNotAdvertised(self.topic.to_string()));
        }
        let _guard = self.context.lock();
        self.context.publish(&self.topic, msg, self.scope)
    }
}

impl<T: Message> fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic.as_str())
            .field("scope", &self.scope)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// The Node is the main entry point for the application
pub struct Node {
    node_id: String,
    config: NodeConfig,
    context: Arc<Context>,
    state: Mutex<NodeState>,
    logger: Logger,
}

impl Node {
    /// Create a node on the process-wide default context
    pub fn new(config: NodeConfig) -> Result<Self> {
        let context = Context::global()?;
        Ok(Self::with_context(context, config))
    }

    /// Create a node on an explicit context
    pub fn with_context(context: Arc<Context>, config: NodeConfig) -> Self {
        if let Some(logging_config) = &config.logging_config {
            logging_config.apply();
            if config.verbose {
                logging_config.init_env_logger();
            }
        }

        let node_id = Uuid::new_v4().to_string();
        let logger = Logger::new_root(Component::Node, &node_id);
        logger.info_args(format_args!("node created: {config}"));

        Self {
            node_id,
            config,
            context,
            state: Mutex::new(NodeState::default()),
            logger,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Whether a shutdown was requested (SIGINT/SIGTERM or `Context::interrupt`)
    pub fn interrupted(&self) -> bool {
        self.context.is_interrupted()
    }

    fn advertisement(
        &self,
        kind: AdvertiseKind,
        name: &TopicName,
        msg_type: &str,
        rep_type: Option<&str>,
        scope: Scope,
    ) -> Advertisement {
        let transport = self.context.transport();
        Advertisement {
            kind,
            name: name.as_str().to_string(),
            address: transport.address().to_string(),
            ctrl_address: transport.control_address(),
            node_id: self.node_id.clone(),
            process_id: self.context.process_id().to_string(),
            host: self.context.host().to_string(),
            scope,
            msg_type: msg_type.to_string(),
            rep_type: rep_type.map(str::to_string),
        }
    }

    // ---------------------------------------------------------------------
    // Topics
    // ---------------------------------------------------------------------

    /// Advertise `topic` with the configured default scope
    pub fn advertise<T: Message>(&self, topic: &str) -> Result<Publisher<T>> {
        self.advertise_with_scope(topic, self.config.default_scope)
    }

    pub fn advertise_with_scope<T: Message>(
        &self,
        topic: &str,
        scope: Scope,
    ) -> Result<Publisher<T>> {
        let topic = TopicName::new(topic)?;
        let _guard = self.context.lock();

        let active = Arc::new(AtomicBool::new(true));
        {
            let mut state = self.state.lock();
            if state.topics_advertised.contains_key(&topic) {
                return Err(NodeError::AlreadyAdvertised(topic.into_string()));
            }
            state.topics_advertised.insert(
                topic.clone(),
                AdvertisedTopic {
                    msg_type: T::type_name(),
                    scope,
                    active: Arc::clone(&active),
                },
            );
        }

        let ad = self.advertisement(AdvertiseKind::Topic, &topic, T::type_name(), None, scope);
        if let Err(err) = self.context.discovery().advertise(ad) {
            self.state.lock().topics_advertised.remove(&topic);
            return Err(NodeError::discovery(err));
        }

        self.logger
            .debug_args(format_args!("advertised topic [{topic}] scope={scope}"));
        Ok(Publisher {
            topic,
            scope,
            active,
            context: Arc::clone(&self.context),
            _marker: PhantomData,
        })
    }

    /// Stop advertising `topic`. Returns false if it was not advertised.
    pub fn unadvertise(&self, topic: &str) -> Result<bool> {
        let topic = TopicName::new(topic)?;
        let _guard = self.context.lock();

        let Some(advertised) = self.state.lock().topics_advertised.remove(&topic) else {
            return Ok(false);
        };
        advertised.active.store(false, Ordering::SeqCst);
        self.context
            .discovery()
            .unadvertise(AdvertiseKind::Topic, topic.as_str(), &self.node_id)
            .map_err(NodeError::discovery)?;

        self.logger
            .debug_args(format_args!("unadvertised topic [{topic}]"));
        Ok(true)
    }

    /// Publish on a topic this node advertised with type `T`.
    ///
    /// Local subscribers get `msg` by reference. Returns the number of local
    /// subscribers reached.
    pub fn publish<T: Message>(&self, topic: &str, msg: &T) -> Result<usize> {
        let topic = TopicName::new(topic)?;
        let _guard = self.context.lock();

        let scope = {
            let state = self.state.lock();
            let advertised = state
                .topics_advertised
                .get(&topic)
                .ok_or_else(|| NodeError::TopicNotAdvertised(topic.to_string()))?;
            if advertised.msg_type != T::type_name() {
                return Err(NodeError::type_mismatch(
                    topic.as_str(),
                    advertised.msg_type,
                    T::type_name(),
                ));
            }
            advertised.scope
        };
        self.context.publish(&topic, msg, scope)
    }

    /// Subscribe to `topic`. Subscribing again replaces the previous callback.
    pub fn subscribe<T, F>(&self, topic: &str, callback: F) -> Result<()>
    where
        T: Message,
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        let topic = TopicName::new(topic)?;
        let _guard = self.context.lock();

        let handler: Arc<dyn SubscriptionHandler> = Arc::new(TypedSubscriptionHandler::<T>::new(
            self.node_id.as_str(),
            callback,
            &self.logger.with_topic(topic.as_str()),
        ));
        let replaced = self
            .context
            .subscriptions()
            .insert(&topic, &self.node_id, handler);
        {
            let mut state = self.state.lock();
            if !state.topics_subscribed.contains(&topic) {
                state.topics_subscribed.push(topic.clone());
            }
        }

        self.logger.debug_args(format_args!(
            "subscribed to [{topic}]{}",
            if replaced { " (replaced)" } else { "" }
        ));
        self.context
            .discovery()
            .discover(AdvertiseKind::Topic, topic.as_str())
            .map_err(NodeError::discovery)
    }

    /// Remove this node's subscription to `topic`. Other nodes' subscriptions
    /// stay. Returns false if the node was not subscribed.
    pub fn unsubscribe(&self, topic: &str) -> Result<bool> {
        let topic = TopicName::new(topic)?;
        let _guard = self.context.lock();

        let removed = self
            .context
            .subscriptions()
            .remove_for_owner(&topic, &self.node_id);
        self.state.lock().topics_subscribed.retain(|t| t != &topic);
        Ok(!removed.is_empty())
    }

    // ---------------------------------------------------------------------
    // Services
    // ---------------------------------------------------------------------

    /// Advertise a service with the configured default scope.
    ///
    /// `func` returning `Err` answers the call as failed.
    pub fn advertise_service<Req, Rep, F>(&self, service: &str, func: F) -> Result<()>
    where
        Req: Message,
        Rep: Message,
        F: Fn(&Req) -> anyhow::Result<Rep> + Send + Sync + 'static,
    {
        self.advertise_service_with_scope(service, func, self.config.default_scope)
    }

    pub fn advertise_service_with_scope<Req, Rep, F>(
        &self,
        service: &str,
        func: F,
        scope: Scope,
    ) -> Result<()>
    where
        Req: Message,
        Rep: Message,
        F: Fn(&Req) -> anyhow::Result<Rep> + Send + Sync + 'static,
    {
        let service = TopicName::new(service)?;
        let _guard = self.context.lock();

        let handler: Arc<dyn ReplyHandler> = Arc::new(TypedReplyHandler::<Req, Rep>::new(
            self.node_id.as_str(),
            func,
            &self.logger.with_topic(service.as_str()),
        ));
        self.context
            .repliers()
            .insert(&service, &self.node_id, handler);
        self.state.lock().services_advertised.insert(
            service.clone(),
            AdvertisedService {
                req_type: Req::type_name(),
                rep_type: Rep::type_name(),
            },
        );

        let ad = self.advertisement(
            AdvertiseKind::Service,
            &service,
            Req::type_name(),
            Some(Rep::type_name()),
            scope,
        );
        if let Err(err) = self.context.discovery().advertise(ad) {
            self.context
                .repliers()
                .remove_for_owner(&service, &self.node_id);
            self.state.lock().services_advertised.remove(&service);
            return Err(NodeError::discovery(err));
        }

        self.logger
            .debug_args(format_args!("advertised service [{service}] scope={scope}"));

        let served = self.context.send_pending_requests(&service);
        if served > 0 {
            self.logger
                .debug_args(format_args!("[{service}] took {served} waiting request(s)"));
        }
        Ok(())
    }

    /// Stop serving `service`. Returns false if this node did not serve it.
    pub fn unadvertise_service(&self, service: &str) -> Result<bool> {
        let service = TopicName::new(service)?;
        let _guard = self.context.lock();

        let removed = self
            .context
            .repliers()
            .remove_for_owner(&service, &self.node_id);
        let known = self
            .state
            .lock()
            .services_advertised
            .remove(&service)
            .is_some();
        if known {
            self.context
                .discovery()
                .unadvertise(AdvertiseKind::Service, service.as_str(), &self.node_id)
                .map_err(NodeError::discovery)?;
        }
        Ok(known || !removed.is_empty())
    }

    // ---------------------------------------------------------------------
    // Requests
    // ---------------------------------------------------------------------

    /// Call `service` without blocking. `callback` runs with the outcome on
    /// whichever thread learns it: right here for a replier in this process,
    /// a transport thread otherwise.
    pub fn request<Req, Rep, F>(&self, service: &str, request: &Req, callback: F) -> Result<()>
    where
        Req: Message,
        Rep: Message,
        F: FnOnce(&str, ServiceReply<Rep>) + Send + 'static,
    {
        let service = TopicName::new(service)?;
        self.submit(&service, request, callback).map(|_| ())
    }

    /// Call `service` and wait up to `timeout` for the reply.
    ///
    /// `Ok(None)` means the call did not complete in time; a reply arriving
    /// later is discarded.
    pub fn request_blocking<Req, Rep>(
        &self,
        service: &str,
        request: &Req,
        timeout: Duration,
    ) -> Result<Option<ServiceReply<Rep>>>
    where
        Req: Message,
        Rep: Message,
    {
        let service = TopicName::new(service)?;
        let deadline = Instant::now() + timeout;

        let pending = {
            let _guard = self.context.lock();
            if let Some(reply) = self.local_request::<Req, Rep>(&service, request)? {
                return Ok(Some(reply));
            }
            let pending = Arc::new(self.pending_request::<Req, Rep>(&service, request)?);
            self.issue_remote(&service, Arc::clone(&pending))?;
            pending
        };

        let completed = pending.wait_until(deadline);
        self.context
            .requests()
            .remove(&service, pending.handler_id());
        if !completed && pending.mark_timed_out() {
            self.logger.debug_args(format_args!(
                "request to [{service}] timed out after {timeout:?}"
            ));
            return Ok(None);
        }

        match pending.reply() {
            Some((true, bytes)) => Ok(Some(ServiceReply::Success(Rep::decode(&bytes)?))),
            Some((false, _)) => Ok(Some(ServiceReply::Failed)),
            None => Err(NodeError::RequestAbandoned(service.into_string())),
        }
    }

    /// Call `service` and await the reply, bounded by the configured request
    /// timeout.
    pub async fn request_future<Req, Rep>(
        &self,
        service: &str,
        request: &Req,
    ) -> Result<ServiceReply<Rep>>
    where
        Req: Message,
        Rep: Message,
    {
        let service = TopicName::new(service)?;
        let (tx, rx) = oneshot::channel();
        let handler_id = self.submit::<Req, Rep, _>(&service, request, move |_, reply| {
            let _ = tx.send(reply);
        })?;

        match tokio::time::timeout(self.config.request_timeout(), rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(NodeError::RequestAbandoned(service.into_string())),
            Err(_) => {
                if let Some(handler_id) = handler_id {
                    if let Some(pending) = self.context.requests().remove(&service, &handler_id) {
                        pending.mark_timed_out();
                    }
                }
                Err(NodeError::RequestTimedOut(service.into_string()))
            }
        }
    }

    /// Serve locally or register a pending request with `callback`.
    /// Returns the pending request id when the call went remote.
    fn submit<Req, Rep, F>(
        &self,
        service: &TopicName,
        request: &Req,
        callback: F,
    ) -> Result<Option<String>>
    where
        Req: Message,
        Rep: Message,
        F: FnOnce(&str, ServiceReply<Rep>) + Send + 'static,
    {
        let _guard = self.context.lock();
        if let Some(reply) = self.local_request::<Req, Rep>(service, request)? {
            callback(service.as_str(), reply);
            return Ok(None);
        }

        let logger = self.logger.clone();
        let pending = self
            .pending_request::<Req, Rep>(service, request)?
            .with_callback(Box::new(move |name, bytes, success| {
                callback(name, decode_reply::<Rep>(name, bytes, success, &logger));
            }));
        let handler_id = pending.handler_id().to_string();
        self.issue_remote(service, Arc::new(pending))?;
        Ok(Some(handler_id))
    }

    /// Serve the call with a replier of this process, preferring one whose
    /// types match. A replier of other types yields `TypeMismatch`.
    fn local_request<Req, Rep>(
        &self,
        service: &TopicName,
        request: &Req,
    ) -> Result<Option<ServiceReply<Rep>>>
    where
        Req: Message,
        Rep: Message,
    {
        let replier = self
            .context
            .replier_for(service, Req::type_name(), Rep::type_name())
            .or_else(|| self.context.repliers().find(service, |_| true));
        let Some(replier) = replier else {
            return Ok(None);
        };

        let mut slot: Option<Rep> = None;
        let success = replier.run_local(
            service.as_str(),
            &LocalMessage::new(request),
            &mut LocalReply::new(&mut slot),
        )?;
        self.logger
            .debug_args(format_args!("[{service}] served in process, success={success}"));
        Ok(Some(match slot {
            Some(reply) if success => ServiceReply::Success(reply),
            _ => ServiceReply::Failed,
        }))
    }

    fn pending_request<Req: Message, Rep: Message>(
        &self,
        service: &TopicName,
        request: &Req,
    ) -> Result<PendingRequest> {
        Ok(PendingRequest::new(
            service.clone(),
            self.node_id.as_str(),
            request.encode()?,
            Req::type_name(),
            Rep::type_name(),
            &self.logger,
        ))
    }

    /// Register `pending` and send it now if a replier address is known,
    /// otherwise ask discovery to find one.
    fn issue_remote(&self, service: &TopicName, pending: Arc<PendingRequest>) -> Result<()> {
        let handler_id = pending.handler_id().to_string();
        self.context
            .requests()
            .add(service, &self.node_id, Arc::clone(&pending));
        pending.mark_awaiting();

        let known = self
            .context
            .discovery()
            .addresses(AdvertiseKind::Service, service.as_str())
            .is_some();
        if known && self.context.send_pending_requests(service) > 0 && pending.is_sent() {
            return Ok(());
        }

        if let Err(err) = self
            .context
            .discovery()
            .discover(AdvertiseKind::Service, service.as_str())
        {
            self.context.requests().remove(service, &handler_id);
            pending.abandon();
            return Err(NodeError::discovery(err));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    pub fn advertised_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .state
            .lock()
            .topics_advertised
            .keys()
            .map(|t| t.to_string())
            .collect();
        topics.sort();
        topics
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.state
            .lock()
            .topics_subscribed
            .iter()
            .map(|t| t.to_string())
            .collect()
    }

    pub fn advertised_services(&self) -> Vec<String> {
        let mut services: Vec<String> = self
            .state
            .lock()
            .services_advertised
            .keys()
            .map(|s| s.to_string())
            .collect();
        services.sort();
        services
    }

    /// Request and reply type names of a service this node serves
    pub fn service_types(&self, service: &str) -> Option<(&'static str, &'static str)> {
        let service = TopicName::new(service).ok()?;
        self.state
            .lock()
            .services_advertised
            .get(&service)
            .map(|s| (s.req_type, s.rep_type))
    }

    /// Every topic known to discovery from here
    pub fn topic_list(&self) -> Vec<String> {
        self.context.discovery().names(AdvertiseKind::Topic)
    }

    /// Every service known to discovery from here
    pub fn service_list(&self) -> Vec<String> {
        self.context.discovery().names(AdvertiseKind::Service)
    }

    /// Publishers of `topic` known to discovery
    pub fn topic_info(&self, topic: &str) -> Result<Vec<Advertisement>> {
        let topic = TopicName::new(topic)?;
        Ok(self
            .context
            .discovery()
            .addresses(AdvertiseKind::Topic, topic.as_str())
            .unwrap_or_default())
    }

    /// Repliers of `service` known to discovery
    pub fn service_info(&self, service: &str) -> Result<Vec<Advertisement>> {
        let service = TopicName::new(service)?;
        Ok(self
            .context
            .discovery()
            .addresses(AdvertiseKind::Service, service.as_str())
            .unwrap_or_default())
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let _guard = self.context.lock();
        let state = std::mem::take(&mut *self.state.lock());
        let discovery = self.context.discovery();

        for (topic, advertised) in state.topics_advertised {
            advertised.active.store(false, Ordering::SeqCst);
            if let Err(err) =
                discovery.unadvertise(AdvertiseKind::Topic, topic.as_str(), &self.node_id)
            {
                self.logger
                    .warn_args(format_args!("unadvertising [{topic}]: {err:#}"));
            }
        }
        for service in state.services_advertised.keys() {
            if let Err(err) =
                discovery.unadvertise(AdvertiseKind::Service, service.as_str(), &self.node_id)
            {
                self.logger
                    .warn_args(format_args!("unadvertising service [{service}]: {err:#}"));
            }
        }

        let subscriptions = self
            .context
            .subscriptions()
            .remove_all_for_owner(&self.node_id)
            .len();
        let repliers = self
            .context
            .repliers()
            .remove_all_for_owner(&self.node_id)
            .len();
        let abandoned = self
            .context
            .requests()
            .remove_all_for_owner(&self.node_id)
            .into_iter()
            .filter(|pending| pending.abandon())
            .count();

        self.logger.debug_args(format_args!(
            "node dropped: {subscriptions} subscription(s), {repliers} replier(s), {abandoned} abandoned request(s)"
        ));
    }
}

/// Turn reply bytes into the outcome handed to a request callback
fn decode_reply<Rep: Message>(
    service: &str,
    bytes: &[u8],
    success: bool,
    logger: &Logger,
) -> ServiceReply<Rep> {
    if !success {
        return ServiceReply::Failed;
    }
    match Rep::decode(bytes) {
        Ok(reply) => ServiceReply::Success(reply),
        Err(err) => {
            logger.error_args(format_args!("reply from [{service}]: {err}"));
            ServiceReply::Failed
        }
    }
}
