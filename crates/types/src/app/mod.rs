// Path: crates/types/src/app/mod.rs
//! Core application-level data structures like blocks and transactions.

/// Data structures related to consensus: the canonical validator set and the
/// pure quorum/primary arithmetic derived from it.
pub mod consensus;
/// Deterministic view-timeout arithmetic.
pub mod timing;
/// The UTXO-plus-contract transaction model.
pub mod transaction;

pub use consensus::*;
pub use timing::*;
pub use transaction::*;

use crate::codec;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A fixed-size, 32-byte hash of a transaction.
pub type TxHash = [u8; 32];

/// A fixed-size, 32-byte hash of a block header.
pub type BlockHash = [u8; 32];

/// A unique, stable identifier for an on-chain account, derived from the hash
/// of a public key. It is represented as a 32-byte array.
#[derive(
    Encode,
    Decode,
    Serialize,
    Deserialize,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Debug,
    Default,
    Hash,
)]
pub struct AccountId(pub [u8; 32]);

impl AsRef<[u8]> for AccountId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for AccountId {
    fn from(hash: [u8; 32]) -> Self {
        Self(hash)
    }
}

/// Computes a SHA-256 digest of the given bytes.
///
/// Centralized here so every consensus-critical hash in the workspace uses
/// the same function over the same canonical encoding.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    digest.into()
}

/// A domain tag to prevent hash collisions between different signing purposes.
#[derive(Encode, Decode, Clone, Copy, Debug)]
pub enum SigDomain {
    /// Version 1 of the block header signing preimage.
    BlockHeaderV1,
    /// Version 1 of the consensus payload signing preimage.
    ConsensusPayloadV1,
    /// Version 1 of the transaction signing preimage.
    TransactionV1,
}

// -----------------------------------------------------------------------------
// Block Header
// -----------------------------------------------------------------------------

/// The header of a block, containing metadata and commitments.
///
/// The header is what commit signatures endorse: its hash is the block hash,
/// and it is immutable once any commit for the round has been accepted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct BlockHeader {
    /// The header format version.
    pub version: u8,
    /// The height of this block.
    pub height: u32,
    /// The hash of the parent block's header.
    pub prev_hash: BlockHash,
    /// The Merkle root over the ordered transaction hashes in this block.
    pub merkle_root: TxHash,
    /// The UNIX timestamp (in seconds) when the block was proposed.
    pub timestamp: u32,
    /// The committee index of the primary that proposed this block.
    pub primary_index: u8,
    /// The proposer's per-block nonce.
    pub nonce: u64,
    /// The verification script identifying the next block's signers.
    pub next_consensus: Vec<u8>,
}

impl BlockHeader {
    /// Computes the canonical hash of this header. This is the block hash.
    pub fn hash(&self) -> BlockHash {
        sha256(&codec::to_bytes_canonical(self))
    }

    /// Creates the canonical, domain-separated byte string signed by commit
    /// witnesses.
    pub fn signing_preimage(&self) -> Vec<u8> {
        codec::to_bytes_canonical(&(SigDomain::BlockHeaderV1, self))
    }
}

/// One validator's contribution to a finalized block's aggregated witness.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CommitWitness {
    /// The committee index of the signer.
    pub validator_index: u8,
    /// The signature over the block header's signing preimage.
    pub signature: Vec<u8>,
}

/// The aggregated witness over a quorum of commit signatures.
///
/// A block is final only when this carries at least `quorum(N)` signatures
/// from distinct committee members.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode, Default)]
pub struct BlockWitness {
    /// The commit signatures, ordered by validator index.
    pub commits: Vec<CommitWitness>,
}

/// A finalized block: header, quorum witness, and the full transactions in
/// the order fixed by the primary's request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Block {
    /// The header of the block containing metadata.
    pub header: BlockHeader,
    /// The aggregated quorum witness endorsing the header.
    pub witness: BlockWitness,
    /// The transactions included in the block.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The block hash, defined as the header hash.
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }
}
