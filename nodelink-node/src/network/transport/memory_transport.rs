// Memory Transport
//
// INTENTION: Transport over the in-memory switchboard. Frames are encoded with
// bincode exactly as a socket transport would put them on the wire, then
// queued on the target endpoint's delivery lane.

use std::sync::Arc;

use anyhow::Result;
use nodelink_common::Logger;

use super::{Frame, PublishFrame, ReplyFrame, RequestFrame, Transport};
use crate::network::memory_network::{Lane, NetworkInner};
use crate::network::Scope;

pub struct MemoryTransport {
    network: Arc<NetworkInner>,
    address: String,
    process_id: String,
    host: String,
    logger: Logger,
}

impl MemoryTransport {
    pub(crate) fn new(
        network: Arc<NetworkInner>,
        address: String,
        process_id: &str,
        host: &str,
        logger: Logger,
    ) -> Self {
        Self {
            network,
            address,
            process_id: process_id.to_string(),
            host: host.to_string(),
            logger,
        }
    }
}

impl Transport for MemoryTransport {
    fn address(&self) -> &str {
        &self.address
    }

    fn send_request(&self, address: &str, frame: RequestFrame) -> Result<()> {
        self.logger.debug_args(format_args!(
            "request {} for [{}] -> {address}",
            frame.handler_id, frame.service
        ));
        self.network
            .deliver(address, Lane::Inbound, &Frame::Request(frame))
    }

    fn send_reply(&self, address: &str, frame: ReplyFrame) -> Result<()> {
        self.network
            .deliver(address, Lane::Reply, &Frame::Reply(frame))
    }

    fn publish(
        &self,
        topic: &str,
        msg_type: &str,
        payload: &[u8],
        scope: Scope,
    ) -> Result<usize> {
        let targets = self
            .network
            .subscriber_addresses(&self.address, topic, |process_id, host| {
                scope.allows(&self.process_id, &self.host, process_id, host)
            });
        let frame = Frame::Publish(PublishFrame {
            topic: topic.to_string(),
            msg_type: msg_type.to_string(),
            payload: payload.to_vec(),
            origin_process: self.process_id.clone(),
            origin_host: self.host.clone(),
            scope,
        });

        let mut sent = 0;
        for target in targets {
            match self.network.deliver(&target, Lane::Inbound, &frame) {
                Ok(()) => sent += 1,
                Err(err) => self
                    .logger
                    .warn_args(format_args!("publish [{topic}] to {target} failed: {err:#}")),
            }
        }
        Ok(sent)
    }

    fn has_remote_subscribers(&self, topic: &str) -> bool {
        !self
            .network
            .subscriber_addresses(&self.address, topic, |_, _| true)
            .is_empty()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.detach(&self.address);
    }
}
