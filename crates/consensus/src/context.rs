// Path: crates/consensus/src/context.rs
//! Per-round mutable state owned exclusively by the state machine.
//!
//! The context accumulates protocol messages under a one-entry-per-validator
//! invariant made structural: every collection is an index-keyed vector of
//! optional slots, sized to the committee. It answers the "are we ready to
//! advance" queries; the state machine decides what to do about the answers.

use crate::payload::ConsensusPayload;
use crate::verification::TransactionVerificationContext;
use meridian_types::app::{quorum, BlockHash, BlockHeader, TxHash};
use meridian_types::error::ConsensusError;

/// The block under construction for the current round.
#[derive(Debug, Clone)]
pub struct CandidateBlock {
    /// The header the committee is being asked to endorse.
    pub header: BlockHeader,
    /// The header hash; immutable once any commit is accepted.
    pub hash: BlockHash,
    /// The ordered transaction hashes fixed by the primary's request.
    pub transaction_hashes: Vec<TxHash>,
    /// The hash of the `PrepareRequest` payload that defined this candidate;
    /// what `PrepareResponse` endorsements reference.
    pub request_payload_hash: [u8; 32],
}

/// A recorded commit: the carrying payload plus the extracted signature.
#[derive(Debug, Clone)]
pub struct CommitSlot {
    /// The full commit payload, kept for recovery responses.
    pub payload: ConsensusPayload,
    /// The signature over the candidate header's signing preimage.
    pub signature: Vec<u8>,
}

/// A recorded change-view vote.
#[derive(Debug, Clone)]
pub struct ChangeViewSlot {
    /// The full change-view payload, kept for recovery responses.
    pub payload: ConsensusPayload,
    /// The view the validator asked to move to.
    pub new_view: u8,
}

/// Mutable state for one `(block_index, view_number)` round.
#[derive(Debug)]
pub struct RoundContext {
    block_index: u32,
    view_number: u8,
    committee_size: usize,
    my_index: Option<u8>,
    candidate: Option<CandidateBlock>,
    preparations: Vec<Option<ConsensusPayload>>,
    commits: Vec<Option<CommitSlot>>,
    change_views: Vec<Option<ChangeViewSlot>>,
    last_seen_height: Vec<u32>,
    verification: TransactionVerificationContext,
    view_started_at_ms: u64,
}

impl RoundContext {
    /// Creates the context for the first round this node participates in.
    pub fn new(committee_size: usize, my_index: Option<u8>) -> Self {
        Self {
            block_index: 0,
            view_number: 0,
            committee_size,
            my_index,
            candidate: None,
            preparations: vec![None; committee_size],
            commits: vec![None; committee_size],
            change_views: vec![None; committee_size],
            last_seen_height: vec![0; committee_size],
            verification: TransactionVerificationContext::new(),
            view_started_at_ms: 0,
        }
    }

    /// Resets everything for a new height. Last-seen tracking survives, since
    /// it describes peers rather than the round.
    pub fn reset_for_height(&mut self, block_index: u32, now_ms: u64) {
        self.block_index = block_index;
        self.view_number = 0;
        self.candidate = None;
        self.preparations = vec![None; self.committee_size];
        self.commits = vec![None; self.committee_size];
        self.change_views = vec![None; self.committee_size];
        self.verification.reset();
        self.view_started_at_ms = now_ms;
    }

    /// Advances to a later view within the same height.
    ///
    /// Preparations and commits belong to the abandoned view and are cleared;
    /// change-view votes are retained so recovery responses can still justify
    /// how this view was reached.
    pub fn advance_view(&mut self, new_view: u8, now_ms: u64) -> Result<(), ConsensusError> {
        if new_view <= self.view_number {
            return Err(ConsensusError::InvariantViolation(format!(
                "view must advance monotonically: {} -> {}",
                self.view_number, new_view
            )));
        }
        self.view_number = new_view;
        self.candidate = None;
        self.preparations = vec![None; self.committee_size];
        self.commits = vec![None; self.committee_size];
        self.verification.reset();
        self.view_started_at_ms = now_ms;
        Ok(())
    }

    /// The height being agreed on.
    pub fn block_index(&self) -> u32 {
        self.block_index
    }

    /// The current view within the height.
    pub fn view_number(&self) -> u8 {
        self.view_number
    }

    /// This node's committee index, or `None` for an observer.
    pub fn my_index(&self) -> Option<u8> {
        self.my_index
    }

    /// The quorum `M` for the committee this context tracks.
    pub fn quorum(&self) -> usize {
        quorum(self.committee_size)
    }

    /// When the current view started, for timeout bookkeeping.
    pub fn view_started_at_ms(&self) -> u64 {
        self.view_started_at_ms
    }

    /// The round's verification context.
    pub fn verification_mut(&mut self) -> &mut TransactionVerificationContext {
        &mut self.verification
    }

    // --- Candidate -----------------------------------------------------------

    /// The candidate block, if a request has been accepted or built.
    pub fn candidate(&self) -> Option<&CandidateBlock> {
        self.candidate.as_ref()
    }

    /// Registers the round's candidate block.
    ///
    /// Once any commit has been accepted the candidate is immutable: the
    /// commit signatures endorse its hash, and replacing it would let the
    /// round finalize two different blocks at one height.
    pub fn set_candidate(&mut self, candidate: CandidateBlock) -> Result<(), ConsensusError> {
        if self.commit_locked() {
            return Err(ConsensusError::InvariantViolation(
                "candidate is immutable once a commit has been accepted".into(),
            ));
        }
        self.candidate = Some(candidate);
        Ok(())
    }

    /// Whether any commit has been accepted for this round.
    pub fn commit_locked(&self) -> bool {
        self.commits.iter().any(Option::is_some)
    }

    // --- Preparations --------------------------------------------------------

    /// Records a validator's preparation: its `PrepareResponse`, or the
    /// `PrepareRequest` itself for the primary.
    ///
    /// Idempotence guard: a second entry for the same validator is rejected
    /// and the first is kept, so a validator cannot retract an endorsement
    /// once the commit stage may have begun.
    pub fn add_preparation(
        &mut self,
        index: u8,
        payload: ConsensusPayload,
    ) -> Result<(), ConsensusError> {
        let slot = Self::slot_mut(&mut self.preparations, index)?;
        if slot.is_some() {
            return Err(ConsensusError::DuplicateMessage {
                kind: "preparation",
                validator_index: index,
            });
        }
        *slot = Some(payload);
        Ok(())
    }

    /// The number of preparations collected this view.
    pub fn preparation_count(&self) -> usize {
        self.preparations.iter().flatten().count()
    }

    /// Whether preparations have reached quorum `M`.
    pub fn has_preparation_quorum(&self) -> bool {
        self.preparation_count() >= self.quorum()
    }

    /// The collected preparation payloads, for recovery responses.
    pub fn preparation_payloads(&self) -> Vec<ConsensusPayload> {
        self.preparations.iter().flatten().cloned().collect()
    }

    // --- Commits -------------------------------------------------------------

    /// Records a validator's commit signature over the candidate header.
    pub fn add_commit(
        &mut self,
        index: u8,
        payload: ConsensusPayload,
        signature: Vec<u8>,
    ) -> Result<(), ConsensusError> {
        if self.candidate.is_none() {
            return Err(ConsensusError::MissingCandidate);
        }
        let slot = Self::slot_mut(&mut self.commits, index)?;
        if slot.is_some() {
            return Err(ConsensusError::DuplicateMessage {
                kind: "commit",
                validator_index: index,
            });
        }
        *slot = Some(CommitSlot { payload, signature });
        Ok(())
    }

    /// The number of commits collected this view.
    pub fn commit_count(&self) -> usize {
        self.commits.iter().flatten().count()
    }

    /// The single safety-critical predicate: a block may be finalized only
    /// when this holds.
    pub fn has_commit_quorum(&self) -> bool {
        self.commit_count() >= self.quorum()
    }

    /// The collected commit signatures as `(validator_index, signature)`
    /// pairs in index order, for the finalized block's aggregated witness.
    pub fn commit_signatures(&self) -> Vec<(u8, Vec<u8>)> {
        self.commits
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_ref()
                    .map(|commit| (i as u8, commit.signature.clone()))
            })
            .collect()
    }

    /// The collected commit payloads, for recovery responses.
    pub fn commit_payloads(&self) -> Vec<ConsensusPayload> {
        self.commits
            .iter()
            .flatten()
            .map(|slot| slot.payload.clone())
            .collect()
    }

    // --- Change views --------------------------------------------------------

    /// Records a validator's change-view vote. Latest wins: unlike
    /// preparations and commits, asking for an even later view supersedes the
    /// earlier request.
    pub fn add_change_view(
        &mut self,
        index: u8,
        payload: ConsensusPayload,
        new_view: u8,
    ) -> Result<(), ConsensusError> {
        let slot = Self::slot_mut(&mut self.change_views, index)?;
        *slot = Some(ChangeViewSlot { payload, new_view });
        Ok(())
    }

    /// Whether at least `M` validators have asked for a view at or beyond
    /// `target`.
    pub fn change_view_quorum(&self, target: u8) -> bool {
        let count = self
            .change_views
            .iter()
            .flatten()
            .filter(|slot| slot.new_view >= target)
            .count();
        count >= self.quorum()
    }

    /// The view a validator has asked to move to, if it has voted this round.
    pub fn requested_view(&self, index: u8) -> Option<u8> {
        self.change_views
            .get(usize::from(index))
            .and_then(|slot| slot.as_ref())
            .map(|slot| slot.new_view)
    }

    /// The collected change-view payloads, for recovery responses.
    pub fn change_view_payloads(&self) -> Vec<ConsensusPayload> {
        self.change_views
            .iter()
            .flatten()
            .map(|slot| slot.payload.clone())
            .collect()
    }

    // --- Peer tracking -------------------------------------------------------

    /// Notes the highest height a validator has been seen acknowledging.
    pub fn note_seen(&mut self, index: u8, block_index: u32) {
        if let Some(entry) = self.last_seen_height.get_mut(usize::from(index)) {
            if block_index > *entry {
                *entry = block_index;
            }
        }
    }

    /// The highest height this validator has acknowledged, or 0 if never seen.
    pub fn last_seen(&self, index: u8) -> u32 {
        self.last_seen_height
            .get(usize::from(index))
            .copied()
            .unwrap_or(0)
    }

    /// Committee members that have not acknowledged the current height.
    pub fn stalled_validators(&self) -> Vec<u8> {
        self.last_seen_height
            .iter()
            .enumerate()
            .filter(|&(i, &seen)| Some(i as u8) != self.my_index && seen < self.block_index)
            .map(|(i, _)| i as u8)
            .collect()
    }

    fn slot_mut<T>(
        slots: &mut [Option<T>],
        index: u8,
    ) -> Result<&mut Option<T>, ConsensusError> {
        let committee = slots.len();
        slots.get_mut(usize::from(index)).ok_or_else(|| {
            ConsensusError::InvariantViolation(format!(
                "validator index {} outside committee of {}",
                index, committee
            ))
        })
    }
}
