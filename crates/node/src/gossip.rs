// Path: crates/node/src/gossip.rs
//! Loopback gossip for the private net: every broadcast lands in every other
//! node's inbound queue, in order. Real deployments put the p2p transport
//! behind the same [`PayloadGossip`] trait.

use async_trait::async_trait;
use meridian_api::network::{GossipError, PayloadGossip};
use meridian_consensus::InboundEvent;
use tokio::sync::mpsc;

/// Delivers payload bytes to every committee member except the sender.
pub struct LoopbackGossip {
    sender_index: usize,
    peers: Vec<mpsc::Sender<InboundEvent>>,
}

impl LoopbackGossip {
    /// Builds the gossip handle for one node of the in-process committee.
    pub fn new(sender_index: usize, peers: Vec<mpsc::Sender<InboundEvent>>) -> Self {
        Self {
            sender_index,
            peers,
        }
    }
}

#[async_trait]
impl PayloadGossip for LoopbackGossip {
    async fn broadcast(&self, payload: Vec<u8>) -> Result<(), GossipError> {
        for (index, peer) in self.peers.iter().enumerate() {
            if index == self.sender_index {
                continue;
            }
            // Fire-and-forget semantics: a peer that has shut down just
            // stops receiving, like a dropped packet.
            let _ = peer.send(InboundEvent::PayloadBytes(payload.clone())).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_everyone_but_the_sender() {
        let (channels, mut receivers): (Vec<_>, Vec<_>) =
            (0..3).map(|_| mpsc::channel::<InboundEvent>(4)).unzip();
        let gossip = LoopbackGossip::new(1, channels);
        gossip.broadcast(vec![0xAB]).await.unwrap();

        assert!(matches!(
            receivers[0].try_recv(),
            Ok(InboundEvent::PayloadBytes(bytes)) if bytes == vec![0xAB]
        ));
        assert!(receivers[1].try_recv().is_err(), "sender must not self-deliver");
        assert!(matches!(
            receivers[2].try_recv(),
            Ok(InboundEvent::PayloadBytes(_))
        ));
    }
}
