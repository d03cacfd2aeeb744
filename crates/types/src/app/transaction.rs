// Path: crates/types/src/app/transaction.rs
//! The transaction model shared by the mempool, consensus, and storage.
//!
//! Meridian transactions carry both UTXO-style coin references (checked for
//! double consumption) and a flat native-asset commitment charged against the
//! sender's balance. Script execution itself lives behind the
//! `ScriptVerifier` collaborator and is out of scope here.

use crate::app::{sha256, AccountId, SigDomain, TxHash};
use crate::codec;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// A reference to the output of a previous transaction, consumed as an input.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, PartialOrd, Ord,
)]
pub struct CoinReference {
    /// The hash of the transaction whose output is consumed.
    pub prev_hash: TxHash,
    /// The index of the consumed output within that transaction.
    pub prev_index: u16,
}

/// A transaction as proposed for inclusion in a candidate block.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Transaction {
    /// The transaction format version.
    pub version: u8,
    /// The sender's per-account nonce for replay protection.
    pub nonce: u32,
    /// The stable identifier of the sending account.
    pub sender: AccountId,
    /// The native-asset amount (fees plus value) this transaction commits
    /// from the sender's balance.
    pub native_commitment: u64,
    /// The network fee paid to validators; used for candidate ordering.
    pub network_fee: u64,
    /// The UTXO inputs consumed by this transaction.
    pub inputs: Vec<CoinReference>,
    /// The invocation script executed by the VM (opaque to consensus).
    pub script: Vec<u8>,
    /// The witness authorizing this transaction (opaque to consensus; checked
    /// by the script verifier).
    pub witness: Vec<u8>,
}

impl Transaction {
    /// Computes the canonical hash of this transaction.
    ///
    /// The witness is excluded so the hash is stable across re-signing.
    pub fn hash(&self) -> TxHash {
        let mut unsigned = self.clone();
        unsigned.witness = vec![];
        sha256(&codec::to_bytes_canonical(&(
            SigDomain::TransactionV1,
            unsigned,
        )))
    }

    /// The total native-asset amount charged to the sender if this
    /// transaction is admitted to a block.
    pub fn total_commitment(&self) -> u64 {
        self.native_commitment.saturating_add(self.network_fee)
    }
}
