// Path: crates/crypto/src/hash.rs
//! Cryptographic hash functions and the transaction Merkle tree.

pub use meridian_types::app::sha256;

use meridian_types::app::TxHash;
use sha2::{Digest, Sha256};

/// Computes the Merkle root over an ordered list of transaction hashes.
///
/// Pairwise SHA-256 with the last node duplicated on odd levels. An empty
/// list yields the all-zero root, which is the canonical root of an empty
/// block.
pub fn merkle_root(hashes: &[TxHash]) -> TxHash {
    if hashes.is_empty() {
        return [0u8; 32];
    }
    let mut level: Vec<TxHash> = hashes.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = *pair.last().unwrap_or(&left);
            let mut hasher = Sha256::new();
            hasher.update(left);
            hasher.update(right);
            next.push(hasher.finalize().into());
        }
        level = next;
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_root_is_zero() {
        assert_eq!(merkle_root(&[]), [0u8; 32]);
    }

    #[test]
    fn single_leaf_levels_up() {
        let leaf = [7u8; 32];
        // One leaf pairs with itself.
        let mut hasher = Sha256::new();
        hasher.update(leaf);
        hasher.update(leaf);
        let expected: TxHash = hasher.finalize().into();
        assert_eq!(merkle_root(&[leaf]), expected);
    }

    #[test]
    fn root_depends_on_order() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn odd_levels_duplicate_last() {
        let leaves = [[1u8; 32], [2u8; 32], [3u8; 32]];
        // Must not panic and must differ from the two-leaf tree.
        assert_ne!(merkle_root(&leaves), merkle_root(&leaves[..2]));
    }
}
