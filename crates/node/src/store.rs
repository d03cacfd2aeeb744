// Path: crates/node/src/store.rs
//! An in-memory chain store for private nets and tests.
//!
//! Append-only with a single-writer lock; real deployments put a durable
//! database behind the same [`BlockchainStore`] trait.

use async_trait::async_trait;
use meridian_api::chain::{BlockchainStore, ScriptVerifier, StateSnapshot};
use meridian_types::app::{AccountId, Block, BlockHash, Transaction};
use meridian_types::error::{BlockError, StoreError, VerifyError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// A witness verifier that accepts everything. Private-net only: the real
/// chain wires the VM's script verifier in here.
pub struct AcceptAllVerifier;

#[async_trait]
impl ScriptVerifier for AcceptAllVerifier {
    async fn verify_witness(&self, _tx: &Transaction) -> Result<(), VerifyError> {
        Ok(())
    }
}

struct StaticSnapshot {
    balances: Arc<HashMap<AccountId, u64>>,
}

impl StateSnapshot for StaticSnapshot {
    fn native_balance(&self, account: &AccountId) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }
}

/// An in-memory, append-only block store with fixed genesis balances.
pub struct InMemoryStore {
    verifier: Arc<dyn ScriptVerifier>,
    balances: Arc<HashMap<AccountId, u64>>,
    blocks: RwLock<Vec<Block>>,
}

impl InMemoryStore {
    /// Creates an empty chain with the given genesis balances.
    pub fn new(balances: HashMap<AccountId, u64>, verifier: Arc<dyn ScriptVerifier>) -> Self {
        Self {
            verifier,
            balances: Arc::new(balances),
            blocks: RwLock::new(Vec::new()),
        }
    }

    /// The number of persisted blocks.
    pub async fn block_count(&self) -> usize {
        self.blocks.read().await.len()
    }
}

#[async_trait]
impl BlockchainStore for InMemoryStore {
    async fn current_height(&self) -> u32 {
        self.blocks.read().await.len() as u32
    }

    async fn current_hash(&self) -> BlockHash {
        self.blocks
            .read()
            .await
            .last()
            .map(Block::hash)
            .unwrap_or([0u8; 32])
    }

    async fn snapshot(&self) -> Arc<dyn StateSnapshot> {
        Arc::new(StaticSnapshot {
            balances: self.balances.clone(),
        })
    }

    async fn verify_transaction(&self, tx: &Transaction) -> Result<(), VerifyError> {
        self.verifier.verify_witness(tx).await
    }

    async fn persist_block(&self, block: Block) -> Result<(), StoreError> {
        let mut blocks = self.blocks.write().await;
        let expected_height = blocks.len() as u32 + 1;
        if block.header.height != expected_height {
            return Err(StoreError::Block(BlockError::InvalidHeight {
                expected: expected_height,
                got: block.header.height,
            }));
        }
        let expected_prev = blocks.last().map(Block::hash).unwrap_or([0u8; 32]);
        if block.header.prev_hash != expected_prev {
            return Err(StoreError::Block(BlockError::MismatchedPrevHash {
                expected: hex::encode(expected_prev),
                got: hex::encode(block.header.prev_hash),
            }));
        }
        info!(
            target: "node",
            height = block.header.height,
            hash = %hex::encode(&block.hash()[..8]),
            transactions = block.transactions.len(),
            "block persisted"
        );
        blocks.push(block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::app::{BlockHeader, BlockWitness};

    fn block(height: u32, prev_hash: BlockHash) -> Block {
        Block {
            header: BlockHeader {
                version: 0,
                height,
                prev_hash,
                merkle_root: [0u8; 32],
                timestamp: 0,
                primary_index: 0,
                nonce: u64::from(height),
                next_consensus: vec![],
            },
            witness: BlockWitness::default(),
            transactions: vec![],
        }
    }

    #[tokio::test]
    async fn appends_blocks_in_order() {
        let store = InMemoryStore::new(HashMap::new(), Arc::new(AcceptAllVerifier));
        assert_eq!(store.current_height().await, 0);

        let first = block(1, [0u8; 32]);
        let first_hash = first.hash();
        store.persist_block(first).await.unwrap();
        assert_eq!(store.current_height().await, 1);
        assert_eq!(store.current_hash().await, first_hash);

        store.persist_block(block(2, first_hash)).await.unwrap();
        assert_eq!(store.current_height().await, 2);
        assert_eq!(store.block_count().await, 2);
    }

    #[tokio::test]
    async fn rejects_height_gaps_and_wrong_parent() {
        let store = InMemoryStore::new(HashMap::new(), Arc::new(AcceptAllVerifier));
        let err = store.persist_block(block(5, [0u8; 32])).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Block(BlockError::InvalidHeight { expected: 1, got: 5 })
        ));

        store.persist_block(block(1, [0u8; 32])).await.unwrap();
        let err = store.persist_block(block(2, [9u8; 32])).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Block(BlockError::MismatchedPrevHash { .. })
        ));
    }

    #[tokio::test]
    async fn snapshot_reads_genesis_balances() {
        let mut balances = HashMap::new();
        let account = AccountId([7u8; 32]);
        balances.insert(account, 500);
        let store = InMemoryStore::new(balances, Arc::new(AcceptAllVerifier));
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.native_balance(&account), 500);
        assert_eq!(snapshot.native_balance(&AccountId([8u8; 32])), 0);
    }
}
