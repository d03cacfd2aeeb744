// Path: crates/consensus/src/verification.rs
//! Incremental, per-round conflict tracking for candidate transactions.
//!
//! The context answers one question: can this transaction join the candidate
//! block without conflicting with what is already in it? Two conflicts exist:
//! consuming an input another admitted transaction already consumes, and
//! pushing a sender's cumulative native-asset commitment above the balance
//! observed at round start. Verification is synchronous and deterministic
//! against that snapshot; script checks happen elsewhere, before the pool.

use meridian_types::app::{AccountId, Transaction};
use meridian_types::error::VerifyError;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Tracks cumulative sender commitments and consumed inputs for one round.
#[derive(Debug, Default)]
pub struct TransactionVerificationContext {
    committed: HashMap<AccountId, u64>,
    consumed: HashSet<meridian_types::app::CoinReference>,
}

impl TransactionVerificationContext {
    /// Creates an empty context for a fresh round.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to admit a transaction against the round's running totals.
    ///
    /// On conflict the context is left unchanged and the reason is returned;
    /// on success the commitment and inputs are recorded.
    pub fn try_add(
        &mut self,
        tx: &Transaction,
        available_balance: u64,
    ) -> Result<(), VerifyError> {
        // A transaction that consumes the same input twice conflicts with
        // itself before it conflicts with anyone else.
        let distinct: HashSet<_> = tx.inputs.iter().collect();
        if distinct.len() != tx.inputs.len() {
            return Err(VerifyError::InputConflict);
        }
        if tx.inputs.iter().any(|input| self.consumed.contains(input)) {
            return Err(VerifyError::InputConflict);
        }

        let committed = self.committed.get(&tx.sender).copied().unwrap_or(0);
        let requested = tx.total_commitment();
        let total = committed.checked_add(requested);
        match total {
            Some(total) if total <= available_balance => {
                self.committed.insert(tx.sender, total);
                self.consumed.extend(tx.inputs.iter().copied());
                Ok(())
            }
            _ => {
                debug!(
                    target: "consensus",
                    sender = %hex::encode(&tx.sender.0[..4]),
                    committed,
                    requested,
                    available_balance,
                    "transaction rejected: balance ceiling"
                );
                Err(VerifyError::BalanceExceeded {
                    committed,
                    requested,
                    available: available_balance,
                })
            }
        }
    }

    /// Releases a previously admitted transaction's commitments.
    ///
    /// Used when a primary's request turns out to reference transactions that
    /// fail re-verification: the ones admitted before the failure are backed
    /// out so the context again reflects only real candidates.
    pub fn release(&mut self, tx: &Transaction) {
        if let Some(committed) = self.committed.get_mut(&tx.sender) {
            *committed = committed.saturating_sub(tx.total_commitment());
            if *committed == 0 {
                self.committed.remove(&tx.sender);
            }
        }
        for input in &tx.inputs {
            self.consumed.remove(input);
        }
    }

    /// Drops all round state. Called when a new height or view begins.
    pub fn reset(&mut self) {
        self.committed.clear();
        self.consumed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::app::CoinReference;

    fn tx(sender: u8, amount: u64, inputs: &[(u8, u16)]) -> Transaction {
        Transaction {
            version: 0,
            nonce: 0,
            sender: AccountId([sender; 32]),
            native_commitment: amount,
            network_fee: 0,
            inputs: inputs
                .iter()
                .map(|(tag, index)| CoinReference {
                    prev_hash: [*tag; 32],
                    prev_index: *index,
                })
                .collect(),
            script: vec![],
            witness: vec![],
        }
    }

    #[test]
    fn admits_within_balance() {
        let mut ctx = TransactionVerificationContext::new();
        ctx.try_add(&tx(1, 60, &[(1, 0)]), 100).unwrap();
        ctx.try_add(&tx(1, 40, &[(2, 0)]), 100).unwrap();
    }

    #[test]
    fn rejects_balance_overcommitment() {
        let mut ctx = TransactionVerificationContext::new();
        ctx.try_add(&tx(1, 60, &[(1, 0)]), 100).unwrap();
        let err = ctx.try_add(&tx(1, 50, &[(2, 0)]), 100).unwrap_err();
        assert!(matches!(
            err,
            VerifyError::BalanceExceeded {
                committed: 60,
                requested: 50,
                available: 100,
            }
        ));
        // The failed attempt must not have consumed its inputs.
        ctx.try_add(&tx(2, 10, &[(2, 0)]), 10).unwrap();
    }

    #[test]
    fn rejects_double_spend_across_transactions() {
        let mut ctx = TransactionVerificationContext::new();
        ctx.try_add(&tx(1, 10, &[(7, 3)]), 100).unwrap();
        let err = ctx.try_add(&tx(2, 10, &[(7, 3)]), 100).unwrap_err();
        assert_eq!(err, VerifyError::InputConflict);
    }

    #[test]
    fn rejects_internal_double_spend() {
        let mut ctx = TransactionVerificationContext::new();
        let err = ctx.try_add(&tx(1, 10, &[(7, 3), (7, 3)]), 100).unwrap_err();
        assert_eq!(err, VerifyError::InputConflict);
    }

    #[test]
    fn release_backs_out_commitments() {
        let mut ctx = TransactionVerificationContext::new();
        let admitted = tx(1, 60, &[(1, 0)]);
        ctx.try_add(&admitted, 100).unwrap();
        ctx.release(&admitted);
        // Both the balance headroom and the input come back.
        ctx.try_add(&tx(1, 100, &[(1, 0)]), 100).unwrap();
    }

    #[test]
    fn overflow_is_a_balance_failure() {
        let mut ctx = TransactionVerificationContext::new();
        ctx.try_add(&tx(1, u64::MAX - 1, &[(1, 0)]), u64::MAX).unwrap();
        let err = ctx.try_add(&tx(1, 2, &[(2, 0)]), u64::MAX).unwrap_err();
        assert!(matches!(err, VerifyError::BalanceExceeded { .. }));
    }
}
