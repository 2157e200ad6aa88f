// Memory-based Discovery
//
// INTENTION: Provide an in-memory implementation of discovery for development
// and testing. Advertisements live in the shared MemoryNetwork; every instance
// only sees the ones whose scope reaches its own process and host.

use std::sync::Arc;

use anyhow::Result;
use nodelink_common::Logger;
use parking_lot::RwLock;

use super::{Discovery, DiscoveryEvent, DiscoveryListener};
use crate::network::memory_network::{ListenerSet, NetworkInner};
use crate::network::{AdvertiseKind, Advertisement};

pub struct MemoryDiscovery {
    network: Arc<NetworkInner>,
    listeners: Arc<ListenerSet>,
    logger: Logger,
}

impl MemoryDiscovery {
    pub(crate) fn new(
        network: Arc<NetworkInner>,
        process_id: &str,
        host: &str,
        logger: Logger,
    ) -> Self {
        let listeners = Arc::new(ListenerSet {
            process_id: process_id.to_string(),
            host: host.to_string(),
            listeners: RwLock::new(Vec::new()),
        });
        network.register_listener_set(&listeners);
        Self {
            network,
            listeners,
            logger,
        }
    }

    fn visible(&self, kind: AdvertiseKind, name: &str) -> Vec<Advertisement> {
        self.network
            .advertisements
            .read()
            .iter()
            .filter(|ad| ad.kind == kind && ad.name == name)
            .filter(|ad| ad.visible_from(&self.listeners.process_id, &self.listeners.host))
            .cloned()
            .collect()
    }
}

impl Discovery for MemoryDiscovery {
    fn discover(&self, kind: AdvertiseKind, name: &str) -> Result<()> {
        let found = self.visible(kind, name);
        self.logger.debug_args(format_args!(
            "discover {kind:?} [{name}]: {} known",
            found.len()
        ));
        for ad in found {
            self.listeners.notify(&DiscoveryEvent::Connected(ad));
        }
        Ok(())
    }

    fn advertise(&self, advertisement: Advertisement) -> Result<()> {
        {
            let mut ads = self.network.advertisements.write();
            ads.retain(|ad| {
                !(ad.kind == advertisement.kind
                    && ad.name == advertisement.name
                    && ad.node_id == advertisement.node_id)
            });
            ads.push(advertisement.clone());
        }
        self.logger.debug_args(format_args!(
            "advertised {:?} [{}] from {} scope={}",
            advertisement.kind, advertisement.name, advertisement.address, advertisement.scope
        ));
        self.network
            .broadcast(DiscoveryEvent::Connected(advertisement));
        Ok(())
    }

    fn unadvertise(&self, kind: AdvertiseKind, name: &str, node_id: &str) -> Result<()> {
        let removed: Vec<Advertisement> = {
            let mut ads = self.network.advertisements.write();
            let (removed, kept): (Vec<_>, Vec<_>) = ads
                .drain(..)
                .partition(|ad| ad.kind == kind && ad.name == name && ad.node_id == node_id);
            *ads = kept;
            removed
        };
        for ad in removed {
            self.logger
                .debug_args(format_args!("unadvertised {kind:?} [{name}] of {node_id}"));
            self.network.broadcast(DiscoveryEvent::Disconnected(ad));
        }
        Ok(())
    }

    fn addresses(&self, kind: AdvertiseKind, name: &str) -> Option<Vec<Advertisement>> {
        let found = self.visible(kind, name);
        (!found.is_empty()).then_some(found)
    }

    fn names(&self, kind: AdvertiseKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .network
            .advertisements
            .read()
            .iter()
            .filter(|ad| ad.kind == kind)
            .filter(|ad| ad.visible_from(&self.listeners.process_id, &self.listeners.host))
            .map(|ad| ad.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn subscribe(&self, listener: DiscoveryListener) -> Result<()> {
        self.listeners.listeners.write().push(listener);
        Ok(())
    }
}
