// Network Transport Module
//
// INTENTION: Move encoded frames between contexts. A transport knows its own
// address, sends request frames to a replier's address, fans published
// messages out to remote subscribers and routes replies back. Inbound frames
// are handed to the receiving context's dispatch entry points.

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod memory_transport;

pub use memory_transport::MemoryTransport;

use super::Scope;

/// A published message on its way to remote subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishFrame {
    pub topic: String,
    pub msg_type: String,
    pub payload: Vec<u8>,
    pub origin_process: String,
    pub origin_host: String,
    pub scope: Scope,
}

/// A service call on its way to a replier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub service: String,
    /// Id of the pending request on the caller side
    pub handler_id: String,
    pub node_id: String,
    pub req_type: String,
    pub rep_type: String,
    pub payload: Vec<u8>,
    /// Where the reply frame must be sent
    pub reply_address: String,
}

/// A reply on its way back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub service: String,
    pub handler_id: String,
    pub payload: Vec<u8>,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Publish(PublishFrame),
    Request(RequestFrame),
    Reply(ReplyFrame),
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

pub trait Transport: Send + Sync {
    /// Address other contexts use to reach this one
    fn address(&self) -> &str;

    /// Auxiliary control address announced next to the data address
    fn control_address(&self) -> String {
        format!("{}/control", self.address())
    }

    /// Send a request frame to the replier at `address`
    fn send_request(&self, address: &str, frame: RequestFrame) -> Result<()>;

    /// Send a reply frame back to the caller at `address`
    fn send_reply(&self, address: &str, frame: ReplyFrame) -> Result<()>;

    /// Fan a message out to remote subscribers allowed by `scope`.
    /// Returns the number of remote contexts it was sent to.
    fn publish(&self, topic: &str, msg_type: &str, payload: &[u8], scope: Scope)
        -> Result<usize>;

    /// Whether any remote context currently subscribes to `topic`
    fn has_remote_subscribers(&self, topic: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_encoding() {
        let frame = Frame::Reply(ReplyFrame {
            service: "/echo".into(),
            handler_id: "h1".into(),
            payload: vec![1, 2, 3],
            success: true,
        });
        let bytes = frame.encode().unwrap();
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
        assert!(Frame::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
