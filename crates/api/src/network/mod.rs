// Path: crates/api/src/network/mod.rs

//! Traits for broadcasting consensus payloads to the committee.

use async_trait::async_trait;

/// An error type for gossip operations.
#[derive(thiserror::Error, Debug)]
pub enum GossipError {
    /// The transport could not accept the payload.
    #[error("network error: {0}")]
    Network(String),
    /// The gossip layer is shutting down.
    #[error("gossip channel closed")]
    Closed,
}

/// Fire-and-forget broadcast of serialized consensus payloads.
///
/// Delivery is not guaranteed; the protocol is timeout/retry driven rather
/// than acknowledgment driven, so a lost payload costs at most a view change.
#[async_trait]
pub trait PayloadGossip: Send + Sync {
    /// Publishes an already-serialized consensus payload to all peers.
    async fn broadcast(&self, payload: Vec<u8>) -> Result<(), GossipError>;
}
