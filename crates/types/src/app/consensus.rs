// Path: crates/types/src/app/consensus.rs
//! The canonical validator set and the pure quorum arithmetic of dBFT.

use crate::app::AccountId;
use crate::error::ConfigError;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// The number of faulty validators a committee of `n` tolerates.
///
/// dBFT tolerates `f = floor((n - 1) / 3)` Byzantine members.
pub fn fault_tolerance(n: usize) -> usize {
    (n - 1) / 3
}

/// The quorum `M = n - f`: the number of matching endorsements or commits
/// required to make progress or finalize a block.
pub fn quorum(n: usize) -> usize {
    n - fault_tolerance(n)
}

/// The committee index of the primary (block proposer) for a round.
///
/// Round-robin over the committee, offset by the view number so that a
/// stalled primary is skipped on view change. Computed with signed
/// arithmetic: a view number larger than the block index must not underflow.
pub fn primary_index(block_index: u32, view_number: u8, n: usize) -> u8 {
    let n = n as i64;
    let p = (i64::from(block_index) - i64::from(view_number)).rem_euclid(n);
    p as u8
}

/// Represents a single member of the committee.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    /// The stable, unique identifier for the validator's account.
    pub account_id: AccountId,
    /// The validator's protobuf-encoded Ed25519 public key.
    pub public_key: Vec<u8>,
}

/// The ordered committee for a height.
///
/// The order is fixed for the duration of a height; committee changes apply
/// only at block boundaries via governance, which is out of scope here.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
}

impl ValidatorSet {
    /// Builds a validator set, rejecting committees dBFT cannot operate with.
    pub fn new(validators: Vec<Validator>) -> Result<Self, ConfigError> {
        if validators.len() < 4 {
            return Err(ConfigError::CommitteeTooSmall {
                got: validators.len(),
            });
        }
        if validators.len() > usize::from(u8::MAX) {
            return Err(ConfigError::CommitteeTooLarge {
                got: validators.len(),
            });
        }
        Ok(Self { validators })
    }

    /// The committee size `N`.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Always false: construction rejects empty committees.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// The fault tolerance `f` of this committee.
    pub fn fault_tolerance(&self) -> usize {
        fault_tolerance(self.len())
    }

    /// The quorum `M` of this committee.
    pub fn quorum(&self) -> usize {
        quorum(self.len())
    }

    /// The primary index for the given round.
    pub fn primary_index(&self, block_index: u32, view_number: u8) -> u8 {
        primary_index(block_index, view_number, self.len())
    }

    /// The validator at the given committee index.
    pub fn get(&self, index: u8) -> Option<&Validator> {
        self.validators.get(usize::from(index))
    }

    /// The committee index of the validator with the given account, if any.
    /// `None` means this node observes the committee without membership.
    pub fn index_of(&self, account_id: &AccountId) -> Option<u8> {
        self.validators
            .iter()
            .position(|v| v.account_id == *account_id)
            .map(|i| i as u8)
    }

    /// Iterates the committee in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }

    /// The verification script identifying this committee as block signers:
    /// the hash of the quorum threshold and the ordered public keys.
    ///
    /// Carried in block headers as `next_consensus` so light clients can
    /// check which committee is expected to endorse the following block.
    pub fn consensus_script(&self) -> Vec<u8> {
        let keys: Vec<&Vec<u8>> = self.validators.iter().map(|v| &v.public_key).collect();
        let preimage = crate::codec::to_bytes_canonical(&(self.quorum() as u8, keys));
        crate::app::sha256(&preimage).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(tag: u8) -> Validator {
        Validator {
            account_id: AccountId([tag; 32]),
            public_key: vec![tag],
        }
    }

    #[test]
    fn fault_tolerance_and_quorum_match_dbft() {
        assert_eq!(fault_tolerance(4), 1);
        assert_eq!(quorum(4), 3);
        assert_eq!(fault_tolerance(7), 2);
        assert_eq!(quorum(7), 5);
        for n in 4..=100 {
            assert_eq!(fault_tolerance(n), (n - 1) / 3);
            assert_eq!(quorum(n), n - fault_tolerance(n));
        }
    }

    #[test]
    fn primary_rotates_by_height_and_view() {
        assert_eq!(primary_index(100, 0, 7), (100 % 7) as u8);
        assert_eq!(primary_index(100, 0, 7), 2);
        // A view change skips the stalled primary.
        assert_eq!(primary_index(100, 1, 7), 1);
        // Underflow-prone corner: view exceeds the block index.
        assert_eq!(primary_index(1, 3, 4), 2);
        assert_eq!(primary_index(0, 1, 4), 3);
    }

    #[test]
    fn committee_of_three_is_rejected() {
        let err = ValidatorSet::new(vec![member(0), member(1), member(2)]).unwrap_err();
        assert!(matches!(err, ConfigError::CommitteeTooSmall { got: 3 }));
    }

    #[test]
    fn index_of_distinguishes_members_from_observers() {
        let set = ValidatorSet::new((0..4).map(member).collect()).unwrap();
        assert_eq!(set.index_of(&AccountId([2; 32])), Some(2));
        assert_eq!(set.index_of(&AccountId([9; 32])), None);
    }
}
