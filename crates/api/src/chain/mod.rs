// Path: crates/api/src/chain/mod.rs

//! Traits for the blockchain store and script verification collaborators.

use async_trait::async_trait;
use meridian_types::app::{AccountId, Block, BlockHash, Transaction};
use meridian_types::error::{StoreError, VerifyError};
use std::sync::Arc;

/// A read-only view of chain state frozen at the start of a round.
///
/// Candidate assembly and request review must observe the same balances, so
/// the snapshot is taken once per round and shared.
pub trait StateSnapshot: Send + Sync {
    /// The native-asset balance of an account at the snapshot height.
    fn native_balance(&self, account: &AccountId) -> u64;
}

/// The chain persistence collaborator consumed by consensus.
///
/// Writes are single-writer: consensus persists the blocks it finalizes, and
/// sync-driven writes from elsewhere are serialized by the implementation and
/// reported back as externally-persisted block events.
#[async_trait]
pub trait BlockchainStore: Send + Sync {
    /// The height of the latest persisted block.
    async fn current_height(&self) -> u32;

    /// The hash of the latest persisted block.
    async fn current_hash(&self) -> BlockHash;

    /// Takes a read-only snapshot of state for the round starting now.
    async fn snapshot(&self) -> Arc<dyn StateSnapshot>;

    /// Verifies a transaction against chain rules, delegating witness and
    /// script checks to the configured [`ScriptVerifier`].
    async fn verify_transaction(&self, tx: &Transaction) -> Result<(), VerifyError>;

    /// Appends a finalized, quorum-endorsed block.
    async fn persist_block(&self, block: Block) -> Result<(), StoreError>;
}

/// Validates transaction witnesses and scripts.
///
/// Script execution belongs to the VM; consensus only needs the verdict.
#[async_trait]
pub trait ScriptVerifier: Send + Sync {
    /// Verifies the witness script of a transaction.
    async fn verify_witness(&self, tx: &Transaction) -> Result<(), VerifyError>;
}
