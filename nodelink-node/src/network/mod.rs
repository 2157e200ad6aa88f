// Network Module
//
// INTENTION:
// The seams between the dispatch core and the outside world. Discovery maps
// topic and service names to the addresses of their publishers and repliers;
// a transport moves encoded frames between contexts. Both are traits so a
// real network stack can be plugged in. The in-memory implementations join
// several contexts inside one process and are what the tests run on.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod discovery;
pub mod memory_network;
pub mod transport;

pub use discovery::{Discovery, DiscoveryEvent, DiscoveryListener, MemoryDiscovery};
pub use memory_network::MemoryNetwork;
pub use transport::{Frame, MemoryTransport, PublishFrame, ReplyFrame, RequestFrame, Transport};

/// How far an advertisement is visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Scope {
    /// Only nodes of the advertising process
    Process,
    /// Only processes on the advertising host
    Host,
    /// Everyone
    #[default]
    All,
}

impl Scope {
    /// Whether a peer at (`process_id`, `host`) may see something advertised
    /// from (`origin_process`, `origin_host`) with this scope
    pub fn allows(
        self,
        origin_process: &str,
        origin_host: &str,
        process_id: &str,
        host: &str,
    ) -> bool {
        match self {
            Scope::Process => origin_process == process_id && origin_host == host,
            Scope::Host => origin_host == host,
            Scope::All => true,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Process => write!(f, "process"),
            Scope::Host => write!(f, "host"),
            Scope::All => write!(f, "all"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdvertiseKind {
    Topic,
    Service,
}

/// A publisher or replier as announced through discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub kind: AdvertiseKind,
    pub name: String,
    /// Where data for this name is sent
    pub address: String,
    /// Control channel of the advertising context
    pub ctrl_address: String,
    pub node_id: String,
    pub process_id: String,
    pub host: String,
    pub scope: Scope,
    /// Message type for topics, request type for services
    pub msg_type: String,
    /// Reply type, services only
    pub rep_type: Option<String>,
}

impl Advertisement {
    pub fn visible_from(&self, process_id: &str, host: &str) -> bool {
        self.scope
            .allows(&self.process_id, &self.host, process_id, host)
    }
}
