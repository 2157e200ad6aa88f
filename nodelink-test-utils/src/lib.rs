// Test utilities for Nodelink crates
//
// This crate provides test-specific functionality that should not be available
// in production builds. All functions in this crate are for testing only.

use std::sync::Arc;

use anyhow::Result;
use nodelink_common::{LogLevel, LoggingConfig};
use nodelink_node::network::{
    AdvertiseKind, Advertisement, Discovery, DiscoveryListener, ReplyFrame, RequestFrame, Transport,
};
use nodelink_node::{Context, ContextConfig, MemoryNetwork, NodeConfig, Scope};
use parking_lot::Mutex;

/// Host name shared by the contexts of a test network
pub const TEST_HOST: &str = "test-host";

pub mod fixtures {
    pub mod messages {
        use serde::{Deserialize, Serialize};

        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct StringMsg {
            pub data: String,
        }

        impl StringMsg {
            pub fn new(data: impl Into<String>) -> Self {
                Self { data: data.into() }
            }
        }

        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct Int32 {
            pub data: i32,
        }

        impl Int32 {
            pub fn new(data: i32) -> Self {
                Self { data }
            }
        }

        #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
        pub struct Vector3d {
            pub x: f64,
            pub y: f64,
            pub z: f64,
        }

        impl Vector3d {
            pub fn new(x: f64, y: f64, z: f64) -> Self {
                Self { x, y, z }
            }
        }
    }

    /// Replier functions for `Node::advertise_service`
    pub mod services {
        use anyhow::{anyhow, Result};

        use super::messages::{Int32, StringMsg, Vector3d};

        pub fn echo(req: &StringMsg) -> Result<StringMsg> {
            Ok(req.clone())
        }

        pub fn increment(req: &Int32) -> Result<Int32> {
            Ok(Int32::new(req.data + 1))
        }

        pub fn vector_length(req: &Vector3d) -> Result<Int32> {
            let length = (req.x * req.x + req.y * req.y + req.z * req.z).sqrt();
            Ok(Int32::new(length.round() as i32))
        }

        pub fn reject(_: &Int32) -> Result<Int32> {
            Err(anyhow!("request rejected"))
        }

        pub fn crash(_: &Int32) -> Result<Int32> {
            panic!("replier crashed")
        }
    }
}

/// Everything a recording collaborator was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Discover(AdvertiseKind, String),
    Advertise(Advertisement),
    Unadvertise(AdvertiseKind, String, String),
    SendRequest(String, RequestFrame),
    SendReply(String, ReplyFrame),
    Publish(String, String, Scope),
}

/// Shared log of recorded calls
#[derive(Debug, Default, Clone)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl CallLog {
    fn record(&self, call: RecordedCall) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// Discovery that knows nothing and records every call
pub struct RecordingDiscovery {
    log: CallLog,
}

impl Discovery for RecordingDiscovery {
    fn discover(&self, kind: AdvertiseKind, name: &str) -> Result<()> {
        self.log.record(RecordedCall::Discover(kind, name.to_string()));
        Ok(())
    }

    fn advertise(&self, advertisement: Advertisement) -> Result<()> {
        self.log.record(RecordedCall::Advertise(advertisement));
        Ok(())
    }

    fn unadvertise(&self, kind: AdvertiseKind, name: &str, node_id: &str) -> Result<()> {
        self.log.record(RecordedCall::Unadvertise(
            kind,
            name.to_string(),
            node_id.to_string(),
        ));
        Ok(())
    }

    fn addresses(&self, _kind: AdvertiseKind, _name: &str) -> Option<Vec<Advertisement>> {
        None
    }

    fn names(&self, _kind: AdvertiseKind) -> Vec<String> {
        Vec::new()
    }

    fn subscribe(&self, _listener: DiscoveryListener) -> Result<()> {
        Ok(())
    }
}

/// Transport that delivers nothing and records every send
pub struct RecordingTransport {
    log: CallLog,
}

impl Transport for RecordingTransport {
    fn address(&self) -> &str {
        "recording://local"
    }

    fn send_request(&self, address: &str, frame: RequestFrame) -> Result<()> {
        self.log
            .record(RecordedCall::SendRequest(address.to_string(), frame));
        Ok(())
    }

    fn send_reply(&self, address: &str, frame: ReplyFrame) -> Result<()> {
        self.log
            .record(RecordedCall::SendReply(address.to_string(), frame));
        Ok(())
    }

    fn publish(&self, topic: &str, msg_type: &str, _payload: &[u8], scope: Scope) -> Result<usize> {
        self.log.record(RecordedCall::Publish(
            topic.to_string(),
            msg_type.to_string(),
            scope,
        ));
        Ok(0)
    }

    fn has_remote_subscribers(&self, _topic: &str) -> bool {
        false
    }
}

/// A context wired to recording collaborators
pub struct TestContext {
    pub context: Arc<Context>,
    pub discovery_log: CallLog,
    pub transport_log: CallLog,
}

/// Create a standalone context whose discovery and transport only record calls
pub fn create_test_context() -> Result<TestContext> {
    let discovery_log = CallLog::default();
    let transport_log = CallLog::default();
    let context = Context::new(
        ContextConfig::new().with_host_name(TEST_HOST),
        Arc::new(RecordingDiscovery {
            log: discovery_log.clone(),
        }),
        Arc::new(RecordingTransport {
            log: transport_log.clone(),
        }),
    )?;
    Ok(TestContext {
        context,
        discovery_log,
        transport_log,
    })
}

/// Create `count` contexts on one in-memory network, each standing for a
/// separate process on the same host
pub fn create_test_network(count: usize) -> Result<(MemoryNetwork, Vec<Arc<Context>>)> {
    let network = MemoryNetwork::new();
    let contexts = (0..count)
        .map(|_| network.create_context(ContextConfig::new().with_host_name(TEST_HOST)))
        .collect::<Result<Vec<_>>>()?;
    Ok((network, contexts))
}

/// Node configuration for tests: quiet logging and a short request timeout
pub fn create_node_test_config() -> NodeConfig {
    NodeConfig::new()
        .with_logging_config(LoggingConfig::new().with_default_level(LogLevel::Warn))
        .with_request_timeout(2000)
}
