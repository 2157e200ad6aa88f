// Discovery Interface
//
// INTENTION: Resolve topic and service names to the publishers and repliers
// that advertised them, and announce this context's own advertisements.
// Discovery only answers "who is out there"; it never moves message data.
// Results that arrive later are pushed to subscribed listeners as events.

use std::sync::Arc;

use anyhow::Result;

pub mod memory_discovery;

pub use memory_discovery::MemoryDiscovery;

use super::{AdvertiseKind, Advertisement};

/// Discovery events emitted to listeners. The context decides what to do.
#[derive(Clone, Debug)]
pub enum DiscoveryEvent {
    Connected(Advertisement),
    Disconnected(Advertisement),
}

/// Callback for discovery events
pub type DiscoveryListener = Arc<dyn Fn(DiscoveryEvent) + Send + Sync>;

pub trait Discovery: Send + Sync {
    /// Ask for the publishers or repliers of `name`. Matches are delivered to
    /// listeners as `Connected` events, possibly later and on another thread.
    fn discover(&self, kind: AdvertiseKind, name: &str) -> Result<()>;

    /// Announce a publisher or replier
    fn advertise(&self, advertisement: Advertisement) -> Result<()>;

    /// Retract what `node_id` advertised under `name`
    fn unadvertise(&self, kind: AdvertiseKind, name: &str, node_id: &str) -> Result<()>;

    /// Advertisements for `name` already known and visible from here
    fn addresses(&self, kind: AdvertiseKind, name: &str) -> Option<Vec<Advertisement>>;

    /// All advertised names of a kind visible from here
    fn names(&self, kind: AdvertiseKind) -> Vec<String>;

    /// Register a listener for discovery events
    fn subscribe(&self, listener: DiscoveryListener) -> Result<()>;
}
