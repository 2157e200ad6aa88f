// In-memory Network
//
// INTENTION: A switchboard that joins several contexts inside one process as
// if they were separate processes on a network. Every attached context gets an
// endpoint address, a MemoryDiscovery and a MemoryTransport. Frames are encoded
// and pushed through crossbeam channels; each endpoint drains them on its own
// delivery threads, one lane for inbound publications and requests and one for
// replies, so a callback that blocks on a request never stalls the reply it is
// waiting for.

use std::sync::{Arc, Weak};
use std::thread;

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use nodelink_common::{Component, Logger};
use parking_lot::RwLock;
use uuid::Uuid;

use super::discovery::{DiscoveryEvent, DiscoveryListener};
use super::transport::Frame;
use super::{Advertisement, MemoryDiscovery, MemoryTransport};
use crate::config::ContextConfig;
use crate::context::Context;

/// Delivery lane of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lane {
    Inbound,
    Reply,
}

struct Endpoint {
    process_id: String,
    host: String,
    inbound: Sender<Vec<u8>>,
    replies: Sender<Vec<u8>>,
    context: Weak<Context>,
}

/// Listeners registered through one discovery instance
pub(crate) struct ListenerSet {
    pub(crate) process_id: String,
    pub(crate) host: String,
    pub(crate) listeners: RwLock<Vec<DiscoveryListener>>,
}

impl ListenerSet {
    pub(crate) fn notify(&self, event: &DiscoveryEvent) {
        let listeners: Vec<DiscoveryListener> = self.listeners.read().clone();
        for listener in listeners {
            listener(event.clone());
        }
    }
}

pub(crate) struct NetworkInner {
    endpoints: DashMap<String, Endpoint>,
    pub(crate) advertisements: RwLock<Vec<Advertisement>>,
    listener_sets: RwLock<Vec<Weak<ListenerSet>>>,
    logger: Logger,
}

impl NetworkInner {
    pub(crate) fn register_listener_set(&self, set: &Arc<ListenerSet>) {
        let mut sets = self.listener_sets.write();
        sets.retain(|s| s.strong_count() > 0);
        sets.push(Arc::downgrade(set));
    }

    /// Send `event` to every listener set that can see the advertisement
    pub(crate) fn broadcast(&self, event: DiscoveryEvent) {
        let advertisement = match &event {
            DiscoveryEvent::Connected(ad) | DiscoveryEvent::Disconnected(ad) => ad,
        };
        let sets: Vec<Arc<ListenerSet>> = self
            .listener_sets
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|set| advertisement.visible_from(&set.process_id, &set.host))
            .collect();
        for set in sets {
            set.notify(&event);
        }
    }

    /// Encode `frame` and queue it on the endpoint at `address`
    pub(crate) fn deliver(&self, address: &str, lane: Lane, frame: &Frame) -> Result<()> {
        let bytes = frame.encode()?;
        let sender = {
            let endpoint = self
                .endpoints
                .get(address)
                .ok_or_else(|| anyhow!("no endpoint at {address}"))?;
            match lane {
                Lane::Inbound => endpoint.inbound.clone(),
                Lane::Reply => endpoint.replies.clone(),
            }
        };
        sender
            .send(bytes)
            .map_err(|_| anyhow!("endpoint {address} is closed"))
    }

    /// Addresses of other endpoints that subscribe to `topic`, filtered by
    /// `visible(process_id, host)`
    pub(crate) fn subscriber_addresses(
        &self,
        own_address: &str,
        topic: &str,
        visible: impl Fn(&str, &str) -> bool,
    ) -> Vec<String> {
        let candidates: Vec<(String, Weak<Context>)> = self
            .endpoints
            .iter()
            .filter(|entry| entry.key() != own_address)
            .filter(|entry| visible(&entry.value().process_id, &entry.value().host))
            .map(|entry| (entry.key().clone(), entry.value().context.clone()))
            .collect();
        candidates
            .into_iter()
            .filter(|(_, context)| {
                context
                    .upgrade()
                    .map(|ctx| ctx.has_subscribers(topic))
                    .unwrap_or(false)
            })
            .map(|(address, _)| address)
            .collect()
    }

    fn attach(&self, address: &str, context: &Arc<Context>) -> Result<()> {
        let (inbound_tx, inbound_rx) = unbounded();
        let (reply_tx, reply_rx) = unbounded();

        Self::spawn_lane(address, "inbound", inbound_rx, Arc::downgrade(context), &self.logger)?;
        Self::spawn_lane(address, "reply", reply_rx, Arc::downgrade(context), &self.logger)?;

        self.endpoints.insert(
            address.to_string(),
            Endpoint {
                process_id: context.process_id().to_string(),
                host: context.host().to_string(),
                inbound: inbound_tx,
                replies: reply_tx,
                context: Arc::downgrade(context),
            },
        );
        self.logger
            .debug_args(format_args!("attached endpoint {address}"));
        Ok(())
    }

    pub(crate) fn detach(&self, address: &str) {
        if self.endpoints.remove(address).is_some() {
            self.logger
                .debug_args(format_args!("detached endpoint {address}"));
        }
    }

    fn spawn_lane(
        address: &str,
        lane: &str,
        receiver: Receiver<Vec<u8>>,
        context: Weak<Context>,
        logger: &Logger,
    ) -> Result<()> {
        let logger = logger.clone();
        let name = format!("nodelink-{lane}-{address}");
        thread::Builder::new().name(name).spawn(move || {
            for bytes in receiver.iter() {
                let Some(ctx) = context.upgrade() else {
                    break;
                };
                match Frame::decode(&bytes) {
                    Ok(frame) => ctx.handle_frame(frame),
                    Err(err) => logger.error_args(format_args!("dropping undecodable frame: {err:#}")),
                }
            }
        })?;
        Ok(())
    }
}

/// Shared in-memory switchboard
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                endpoints: DashMap::new(),
                advertisements: RwLock::new(Vec::new()),
                listener_sets: RwLock::new(Vec::new()),
                logger: Logger::new_root(Component::Transport, "memory-network"),
            }),
        }
    }

    /// Create a context attached to this network
    pub fn create_context(&self, config: ContextConfig) -> Result<Arc<Context>> {
        let address = format!("mem://{}", Uuid::new_v4());
        let logger = Logger::new_root(Component::Context, &config.process_id);

        let discovery = Arc::new(MemoryDiscovery::new(
            Arc::clone(&self.inner),
            &config.process_id,
            &config.host_name,
            logger.with_component(Component::Discovery),
        ));
        let transport = Arc::new(MemoryTransport::new(
            Arc::clone(&self.inner),
            address.clone(),
            &config.process_id,
            &config.host_name,
            logger.with_component(Component::Transport),
        ));

        let context = Context::new(config, discovery, transport)?;
        self.inner.attach(&address, &context)?;
        Ok(context)
    }

    /// Number of attached endpoints
    pub fn endpoint_count(&self) -> usize {
        self.inner.endpoints.len()
    }

    /// Every advertisement currently announced on the network
    pub fn advertisements(&self) -> Vec<Advertisement> {
        self.inner.advertisements.read().clone()
    }
}
