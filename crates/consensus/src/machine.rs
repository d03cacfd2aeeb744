// Path: crates/consensus/src/machine.rs
//! The dBFT state machine.
//!
//! Sans-IO: the machine consumes one event at a time and returns the actions
//! the caller must execute (broadcasts, timer arming, persistence). All
//! round state lives in the [`RoundContext`] owned exclusively by this type,
//! so the single-threaded driver is what makes the safety invariants hold.
//!
//! Payloads reaching [`ConsensusEvent::Payload`] must already be
//! witness-verified; verification is side-effect-free and may run elsewhere.

use crate::context::{CandidateBlock, RoundContext};
use crate::payload::{ChangeViewReason, ConsensusMessage, ConsensusPayload, MessageKind};
use crate::recovery;
use meridian_api::chain::StateSnapshot;
use meridian_crypto::ValidatorKeypair;
use meridian_types::app::{
    timeout_for_view, Block, BlockHash, BlockHeader, BlockWitness, CommitWitness, Transaction,
    TxHash, ValidatorSet,
};
use meridian_types::config::ConsensusConfig;
use meridian_types::error::{ConfigError, ConsensusError, ErrorCode, VerifyError};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The block header format version this node produces.
const BLOCK_VERSION: u8 = 0;

/// How far in the future (in base block intervals) a primary's timestamp may
/// lie before the request is rejected.
const FUTURE_TIMESTAMP_SLACK_BLOCKS: u64 = 8;

/// Upper bound on unconfirmed transactions held for candidate assembly.
const POOL_LIMIT: usize = 10_000;

/// The states of the per-height round loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    /// Observing only: this node is not in the committee.
    Idle,
    /// Awaiting the primary's request for the current view.
    Backup,
    /// This node is the primary and has sent its request.
    Primary,
    /// The request has been accepted and endorsed; collecting preparations.
    RequestReceived,
    /// This node has signed the candidate header; the view is locked.
    CommitSent,
    /// This node has voted to abandon the current view.
    ViewChanging,
    /// The round's block is persisted; terminal until the next height starts.
    BlockPersisted,
}

/// Events consumed by the machine, in arrival order.
#[derive(Debug)]
pub enum ConsensusEvent {
    /// The round timer fired. Stamped with the round it was armed for, so a
    /// timer superseded by a newer one is recognized and ignored.
    TimerFired {
        /// Height the timer was armed for.
        block_index: u32,
        /// View the timer was armed for.
        view_number: u8,
    },
    /// A deserialized, witness-verified payload from a peer.
    Payload(ConsensusPayload),
    /// A script-verified transaction for the pool.
    TransactionReceived(Transaction),
    /// A block reached storage: our own finalized block, or one that arrived
    /// through sync before this node committed.
    BlockPersisted {
        /// The persisted block.
        block: Box<Block>,
        /// Whether this node's own round produced it.
        own: bool,
    },
    /// The store failed to persist the finalized block.
    PersistFailed {
        /// Height of the block that failed to persist.
        block_index: u32,
    },
}

/// Actions the caller must execute on behalf of the machine.
#[derive(Debug)]
pub enum ConsensusAction {
    /// Broadcast a signed payload to the committee.
    Broadcast(Box<ConsensusPayload>),
    /// Arm the round timer. Supersedes any previously armed timer.
    ArmTimer {
        /// Height to stamp the resulting [`ConsensusEvent::TimerFired`] with.
        block_index: u32,
        /// View to stamp the resulting timer event with.
        view_number: u8,
        /// Delay until firing, in milliseconds.
        delay_ms: u64,
    },
    /// Hand a finalized, quorum-endorsed block to the store.
    PersistBlock(Box<Block>),
    /// Fetch a fresh snapshot and call [`DbftMachine::start_height`].
    BeginHeight {
        /// The height to start.
        block_index: u32,
    },
}

/// The dBFT consensus state machine for one validator (or observer).
pub struct DbftMachine {
    config: ConsensusConfig,
    validators: ValidatorSet,
    keypair: Option<ValidatorKeypair>,
    my_index: Option<u8>,
    state: MachineState,
    ctx: RoundContext,
    pool: HashMap<TxHash, Transaction>,
    snapshot: Option<Arc<dyn StateSnapshot>>,
    prev_hash: BlockHash,
    pending_block: Option<Block>,
}

impl DbftMachine {
    /// Builds a machine for the given committee.
    ///
    /// A node whose key is absent from the committee (or that has no key at
    /// all) runs as an observer: it tracks rounds and accepts finalized
    /// blocks but never signs or broadcasts.
    pub fn new(
        config: ConsensusConfig,
        validators: ValidatorSet,
        keypair: Option<ValidatorKeypair>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let my_index = keypair
            .as_ref()
            .and_then(|kp| validators.index_of(&kp.account_id()));
        Ok(Self {
            ctx: RoundContext::new(validators.len(), my_index),
            config,
            validators,
            keypair,
            my_index,
            state: MachineState::Idle,
            pool: HashMap::new(),
            snapshot: None,
            prev_hash: [0u8; 32],
            pending_block: None,
        })
    }

    /// The committee this machine validates against.
    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// The current machine state.
    pub fn state(&self) -> MachineState {
        self.state
    }

    /// The round context (read-only).
    pub fn context(&self) -> &RoundContext {
        &self.ctx
    }

    /// This node's committee index, or `None` for an observer.
    pub fn my_index(&self) -> Option<u8> {
        self.my_index
    }

    /// The number of transactions waiting in the pool.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Starts the round loop for a height.
    ///
    /// Called once per height with the parent hash and a fresh state
    /// snapshot; view changes within the height never re-enter here.
    pub fn start_height(
        &mut self,
        block_index: u32,
        prev_hash: BlockHash,
        snapshot: Arc<dyn StateSnapshot>,
        now_ms: u64,
    ) -> VecDeque<ConsensusAction> {
        let mut actions = VecDeque::new();
        if self.ctx.block_index() != 0 && block_index <= self.ctx.block_index() {
            let err = ConsensusError::InvalidHeightTransition {
                current: self.ctx.block_index(),
                requested: block_index,
            };
            error!(target: "consensus", code = err.code(), %err, "refusing height transition");
            return actions;
        }
        self.prev_hash = prev_hash;
        self.snapshot = Some(snapshot);
        self.pending_block = None;
        self.ctx.reset_for_height(block_index, now_ms);
        self.start_view(now_ms, &mut actions);
        actions
    }

    /// Processes one event, returning the actions to execute.
    pub fn handle_event(
        &mut self,
        event: ConsensusEvent,
        now_ms: u64,
    ) -> VecDeque<ConsensusAction> {
        let mut actions = VecDeque::new();
        match event {
            ConsensusEvent::TimerFired {
                block_index,
                view_number,
            } => self.on_timer(block_index, view_number, now_ms, &mut actions),
            ConsensusEvent::Payload(payload) => self.on_payload(payload, now_ms, &mut actions),
            ConsensusEvent::TransactionReceived(tx) => self.on_transaction(tx),
            ConsensusEvent::BlockPersisted { block, own } => {
                self.on_block_persisted(*block, own, &mut actions)
            }
            ConsensusEvent::PersistFailed { block_index } => {
                self.on_persist_failed(block_index, &mut actions)
            }
        }
        actions
    }

    // --- Round start ---------------------------------------------------------

    fn start_view(&mut self, now_ms: u64, actions: &mut VecDeque<ConsensusAction>) {
        let block_index = self.ctx.block_index();
        let view = self.ctx.view_number();
        let primary = self.validators.primary_index(block_index, view);
        info!(
            target: "consensus",
            height = block_index,
            view,
            primary,
            me = ?self.my_index,
            "starting round"
        );
        if view > 0 {
            let stalled = self.ctx.stalled_validators();
            if !stalled.is_empty() {
                debug!(target: "consensus", ?stalled, "validators lagging behind this height");
            }
        }
        actions.push_back(ConsensusAction::ArmTimer {
            block_index,
            view_number: view,
            delay_ms: timeout_for_view(view, self.config.milliseconds_per_block),
        });
        if self.my_index == Some(primary) {
            self.state = MachineState::Primary;
            if let Some(request) = self.build_prepare_request(now_ms) {
                actions.push_back(ConsensusAction::Broadcast(Box::new(request)));
            }
        } else if self.my_index.is_some() {
            self.state = MachineState::Backup;
        } else {
            self.state = MachineState::Idle;
        }
    }

    /// Assembles the candidate block from the highest-priority verified
    /// transactions and returns the signed request payload.
    fn build_prepare_request(&mut self, now_ms: u64) -> Option<ConsensusPayload> {
        let my_index = self.my_index?;

        let mut ordered: Vec<&Transaction> = self.pool.values().collect();
        ordered.sort_by(|a, b| {
            b.network_fee
                .cmp(&a.network_fee)
                .then_with(|| a.hash().cmp(&b.hash()))
        });

        let mut hashes = Vec::new();
        for tx in ordered {
            if hashes.len() >= self.config.max_transactions_per_block {
                break;
            }
            let balance = self.balance_of(tx);
            if self.ctx.verification_mut().try_add(tx, balance).is_ok() {
                hashes.push(tx.hash());
            }
        }

        let header = BlockHeader {
            version: BLOCK_VERSION,
            height: self.ctx.block_index(),
            prev_hash: self.prev_hash,
            merkle_root: meridian_crypto::hash::merkle_root(&hashes),
            timestamp: (now_ms / 1_000) as u32,
            primary_index: my_index,
            nonce: rand::random::<u64>(),
            next_consensus: self.validators.consensus_script(),
        };

        let message = ConsensusMessage::PrepareRequest {
            timestamp: header.timestamp,
            nonce: header.nonce,
            transaction_hashes: hashes.clone(),
            next_consensus: header.next_consensus.clone(),
        };
        let payload = self.signed_payload(message)?;

        let candidate = CandidateBlock {
            hash: header.hash(),
            header,
            transaction_hashes: hashes,
            request_payload_hash: payload.hash(),
        };
        info!(
            target: "consensus",
            height = self.ctx.block_index(),
            view = self.ctx.view_number(),
            candidate = %hex::encode(&candidate.hash[..8]),
            transactions = candidate.transaction_hashes.len(),
            "proposing candidate block"
        );
        if let Err(err) = self.ctx.set_candidate(candidate) {
            error!(target: "consensus", code = err.code(), %err, "could not register own candidate");
            return None;
        }
        if let Err(err) = self.ctx.add_preparation(my_index, payload.clone()) {
            error!(target: "consensus", code = err.code(), %err, "could not record own request");
            return None;
        }
        Some(payload)
    }

    // --- Payload dispatch ----------------------------------------------------

    fn on_payload(
        &mut self,
        payload: ConsensusPayload,
        now_ms: u64,
        actions: &mut VecDeque<ConsensusAction>,
    ) {
        self.dispatch_payload(payload, now_ms, actions, false)
    }

    /// `replaying` marks payloads replayed out of a recovery message: they
    /// are record-only, and in particular never answered with recovery
    /// themselves, or two recovering peers would bounce responses forever.
    fn dispatch_payload(
        &mut self,
        payload: ConsensusPayload,
        now_ms: u64,
        actions: &mut VecDeque<ConsensusAction>,
        replaying: bool,
    ) {
        // Loopback gossip echoes our own payloads back; everything we send
        // was already recorded when it was built.
        if Some(payload.validator_index) == self.my_index {
            return;
        }
        self.ctx
            .note_seen(payload.validator_index, payload.block_index);

        if payload.block_index != self.ctx.block_index() {
            debug!(
                target: "consensus",
                kind = %payload.message.kind(),
                from = payload.validator_index,
                got = payload.block_index,
                current = self.ctx.block_index(),
                "payload for another height"
            );
            return;
        }

        match payload.message.kind() {
            MessageKind::ChangeView => self.on_change_view(payload, now_ms, actions, replaying),
            MessageKind::Recovery => self.on_recovery(payload, now_ms, actions),
            kind => {
                // The remaining kinds are bound to the active view.
                if payload.view_number != self.ctx.view_number() {
                    debug!(
                        target: "consensus",
                        %kind,
                        from = payload.validator_index,
                        got = payload.view_number,
                        current = self.ctx.view_number(),
                        "payload for another view"
                    );
                    return;
                }
                match kind {
                    MessageKind::PrepareRequest => {
                        self.on_prepare_request(payload, now_ms, actions)
                    }
                    MessageKind::PrepareResponse => {
                        self.on_prepare_response(payload, now_ms, actions)
                    }
                    MessageKind::Commit => self.on_commit(payload, actions),
                    _ => {}
                }
            }
        }
    }

    fn on_prepare_request(
        &mut self,
        payload: ConsensusPayload,
        now_ms: u64,
        actions: &mut VecDeque<ConsensusAction>,
    ) {
        let index = payload.validator_index;
        let expected = self
            .validators
            .primary_index(self.ctx.block_index(), self.ctx.view_number());
        if index != expected {
            let err = ConsensusError::InvalidPrimary {
                expected,
                got: index,
            };
            warn!(target: "consensus", code = err.code(), %err, "dropping request");
            return;
        }
        if self.ctx.candidate().is_some() {
            debug!(target: "consensus", from = index, "request already accepted this view");
            return;
        }
        // A node that has voted to leave the view still registers the
        // candidate (a recovery replay may prove the round committed without
        // it), but no longer endorses it.
        let endorsing = match self.state {
            MachineState::Backup => true,
            MachineState::Idle | MachineState::ViewChanging => false,
            MachineState::RequestReceived | MachineState::Primary | MachineState::CommitSent => {
                debug!(target: "consensus", from = index, "request already accepted this view");
                return;
            }
            MachineState::BlockPersisted => {
                debug!(target: "consensus", from = index, state = ?self.state, "ignoring request");
                return;
            }
        };
        let ConsensusMessage::PrepareRequest {
            timestamp,
            nonce,
            ref transaction_hashes,
            ref next_consensus,
        } = payload.message
        else {
            return;
        };

        let slack_ms = self
            .config
            .milliseconds_per_block
            .saturating_mul(FUTURE_TIMESTAMP_SLACK_BLOCKS);
        if u64::from(timestamp).saturating_mul(1_000) > now_ms.saturating_add(slack_ms) {
            warn!(target: "consensus", from = index, timestamp, "request timestamp too far in the future");
            if endorsing {
                self.request_change_view(ChangeViewReason::InvalidRequest, now_ms, actions);
            }
            return;
        }

        // Resolve every referenced transaction before admitting any of them.
        let mut transactions = Vec::with_capacity(transaction_hashes.len());
        for hash in transaction_hashes {
            match self.pool.get(hash) {
                Some(tx) => transactions.push(tx.clone()),
                None => {
                    warn!(
                        target: "consensus",
                        from = index,
                        tx = %hex::encode(&hash[..8]),
                        "request references a transaction this node does not hold"
                    );
                    if endorsing {
                        self.request_change_view(
                            ChangeViewReason::TransactionMissing,
                            now_ms,
                            actions,
                        );
                    }
                    return;
                }
            }
        }

        // Re-verify in request order; back out on the first failure so the
        // verification context reflects only real candidates again.
        let mut admitted: Vec<&Transaction> = Vec::with_capacity(transactions.len());
        for tx in &transactions {
            let balance = self.balance_of(tx);
            if let Err(err) = self.ctx.verification_mut().try_add(tx, balance) {
                warn!(
                    target: "consensus",
                    from = index,
                    code = err.code(),
                    %err,
                    tx = %hex::encode(&tx.hash()[..8]),
                    "request transaction failed re-verification"
                );
                for earlier in admitted {
                    self.ctx.verification_mut().release(earlier);
                }
                if endorsing {
                    let reason = match err {
                        VerifyError::UnknownTransaction => ChangeViewReason::TransactionMissing,
                        _ => ChangeViewReason::TransactionInvalid,
                    };
                    self.request_change_view(reason, now_ms, actions);
                }
                return;
            }
            admitted.push(tx);
        }

        let header = BlockHeader {
            version: BLOCK_VERSION,
            height: self.ctx.block_index(),
            prev_hash: self.prev_hash,
            merkle_root: meridian_crypto::hash::merkle_root(transaction_hashes),
            timestamp,
            primary_index: index,
            nonce,
            next_consensus: next_consensus.clone(),
        };
        let candidate = CandidateBlock {
            hash: header.hash(),
            header,
            transaction_hashes: transaction_hashes.clone(),
            request_payload_hash: payload.hash(),
        };
        info!(
            target: "consensus",
            height = self.ctx.block_index(),
            view = self.ctx.view_number(),
            candidate = %hex::encode(&candidate.hash[..8]),
            transactions = candidate.transaction_hashes.len(),
            "accepted candidate block"
        );
        let request_hash = candidate.request_payload_hash;
        if let Err(err) = self.ctx.set_candidate(candidate) {
            error!(target: "consensus", code = err.code(), %err, "could not register candidate");
            return;
        }
        if let Err(err) = self.ctx.add_preparation(index, payload) {
            debug!(target: "consensus", code = err.code(), %err, "primary preparation");
            return;
        }

        if endorsing {
            let response = self.signed_payload(ConsensusMessage::PrepareResponse {
                preparation_hash: request_hash,
            });
            if let (Some(response), Some(my_index)) = (response, self.my_index) {
                if let Err(err) = self.ctx.add_preparation(my_index, response.clone()) {
                    error!(target: "consensus", code = err.code(), %err, "could not record own response");
                } else {
                    actions.push_back(ConsensusAction::Broadcast(Box::new(response)));
                    self.state = MachineState::RequestReceived;
                }
            }
        }
        self.maybe_commit(actions);
    }

    fn on_prepare_response(
        &mut self,
        payload: ConsensusPayload,
        _now_ms: u64,
        actions: &mut VecDeque<ConsensusAction>,
    ) {
        if self.state == MachineState::ViewChanging {
            return;
        }
        let ConsensusMessage::PrepareResponse { preparation_hash } = payload.message else {
            return;
        };
        let Some(candidate) = self.ctx.candidate() else {
            debug!(
                target: "consensus",
                from = payload.validator_index,
                "response before any request; awaiting recovery"
            );
            return;
        };
        if candidate.request_payload_hash != preparation_hash {
            let err = ConsensusError::CandidateMismatch {
                expected: hex::encode(candidate.request_payload_hash),
                got: hex::encode(preparation_hash),
            };
            warn!(
                target: "consensus",
                from = payload.validator_index,
                code = err.code(),
                %err,
                "dropping response"
            );
            return;
        }
        match self
            .ctx
            .add_preparation(payload.validator_index, payload)
        {
            Ok(()) => self.maybe_commit(actions),
            Err(err) => debug!(target: "consensus", code = err.code(), %err, "dropping response"),
        }
    }

    /// Broadcasts this node's commit once a preparation quorum is observed.
    fn maybe_commit(&mut self, actions: &mut VecDeque<ConsensusAction>) {
        let committing_state = matches!(
            self.state,
            MachineState::Primary | MachineState::RequestReceived
        );
        if !committing_state || !self.ctx.has_preparation_quorum() {
            self.maybe_finalize(actions);
            return;
        }
        let Some(candidate) = self.ctx.candidate() else {
            return;
        };
        let preimage = candidate.header.signing_preimage();
        let candidate_hash = candidate.hash;
        let Some(keypair) = self.keypair.as_ref() else {
            return;
        };
        let signature = match keypair.sign(&preimage) {
            Ok(signature) => signature,
            Err(err) => {
                error!(target: "consensus", %err, "could not sign commit");
                return;
            }
        };
        let Some(payload) = self.signed_payload(ConsensusMessage::Commit {
            signature: signature.clone(),
        }) else {
            return;
        };
        let Some(my_index) = self.my_index else {
            return;
        };
        if let Err(err) = self.ctx.add_commit(my_index, payload.clone(), signature) {
            error!(target: "consensus", code = err.code(), %err, "could not record own commit");
            return;
        }
        info!(
            target: "consensus",
            height = self.ctx.block_index(),
            view = self.ctx.view_number(),
            candidate = %hex::encode(&candidate_hash[..8]),
            "preparation quorum reached, commit sent"
        );
        actions.push_back(ConsensusAction::Broadcast(Box::new(payload)));
        self.state = MachineState::CommitSent;
        self.maybe_finalize(actions);
    }

    fn on_commit(&mut self, payload: ConsensusPayload, actions: &mut VecDeque<ConsensusAction>) {
        let ConsensusMessage::Commit { ref signature } = payload.message else {
            return;
        };
        let index = payload.validator_index;
        let Some(candidate) = self.ctx.candidate() else {
            debug!(
                target: "consensus",
                from = index,
                "commit before any candidate; awaiting recovery"
            );
            return;
        };
        let Some(validator) = self.validators.get(index) else {
            return;
        };
        if meridian_crypto::verify_signature(
            &validator.public_key,
            &candidate.header.signing_preimage(),
            signature,
        )
        .is_err()
        {
            let err = ConsensusError::InvalidCommitSignature {
                validator_index: index,
            };
            warn!(target: "consensus", code = err.code(), %err, "dropping commit");
            return;
        }
        let signature = signature.clone();
        match self.ctx.add_commit(index, payload, signature) {
            Ok(()) => self.maybe_finalize(actions),
            Err(err) => debug!(target: "consensus", code = err.code(), %err, "dropping commit"),
        }
    }

    /// Hands the block to storage once the commit quorum holds. Finalization
    /// is unconditional from here: a persistence failure retries the same
    /// block, never a different one.
    fn maybe_finalize(&mut self, actions: &mut VecDeque<ConsensusAction>) {
        if self.pending_block.is_some() || !self.ctx.has_commit_quorum() {
            return;
        }
        let Some(candidate) = self.ctx.candidate() else {
            return;
        };
        let mut transactions = Vec::with_capacity(candidate.transaction_hashes.len());
        for hash in &candidate.transaction_hashes {
            match self.pool.get(hash) {
                Some(tx) => transactions.push(tx.clone()),
                None => {
                    let err = ConsensusError::InvariantViolation(format!(
                        "commit quorum reached but transaction {} left the pool",
                        hex::encode(&hash[..8])
                    ));
                    error!(target: "consensus", code = err.code(), %err, "cannot finalize");
                    return;
                }
            }
        }
        let block = Block {
            header: candidate.header.clone(),
            witness: BlockWitness {
                commits: self
                    .ctx
                    .commit_signatures()
                    .into_iter()
                    .map(|(validator_index, signature)| CommitWitness {
                        validator_index,
                        signature,
                    })
                    .collect(),
            },
            transactions,
        };
        info!(
            target: "consensus",
            height = block.header.height,
            view = self.ctx.view_number(),
            hash = %hex::encode(&block.hash()[..8]),
            commits = block.witness.commits.len(),
            "commit quorum reached, block finalized"
        );
        self.pending_block = Some(block.clone());
        actions.push_back(ConsensusAction::PersistBlock(Box::new(block)));
    }

    // --- View changes --------------------------------------------------------

    fn on_change_view(
        &mut self,
        payload: ConsensusPayload,
        now_ms: u64,
        actions: &mut VecDeque<ConsensusAction>,
        replaying: bool,
    ) {
        if self.state == MachineState::BlockPersisted {
            return;
        }
        let ConsensusMessage::ChangeView {
            new_view_number,
            reason,
            ..
        } = payload.message
        else {
            return;
        };
        let index = payload.validator_index;

        // A vote that cannot move us anywhere is from a validator that has
        // fallen behind; answer with everything this round has collected.
        if payload.view_number < self.ctx.view_number()
            || new_view_number <= self.ctx.view_number()
        {
            debug!(
                target: "consensus",
                from = index,
                %reason,
                their_view = payload.view_number,
                requested = new_view_number,
                current = self.ctx.view_number(),
                "stale change view, answering with recovery"
            );
            if !replaying {
                self.reply_recovery(actions);
            }
            return;
        }

        debug!(
            target: "consensus",
            from = index,
            %reason,
            requested = new_view_number,
            "change view vote"
        );
        if let Err(err) = self.ctx.add_change_view(index, payload, new_view_number) {
            error!(target: "consensus", code = err.code(), %err, "dropping change view");
            return;
        }

        // A commit-locked node never abandons its view: its signature over
        // the candidate is already out. It still answers with recovery so the
        // rest of the committee can converge on the committed round.
        if self.state == MachineState::CommitSent {
            if !replaying {
                self.reply_recovery(actions);
            }
            return;
        }
        if self.ctx.change_view_quorum(new_view_number) {
            self.do_advance_view(new_view_number, now_ms, actions);
        }
    }

    /// Casts this node's own change-view vote for `current + 1`.
    fn request_change_view(
        &mut self,
        reason: ChangeViewReason,
        now_ms: u64,
        actions: &mut VecDeque<ConsensusAction>,
    ) {
        let Some(my_index) = self.my_index else {
            // Observers cannot vote; they wait for the committee to move.
            return;
        };
        let target = match self.ctx.requested_view(my_index) {
            Some(previous) => previous.saturating_add(1),
            None => self.ctx.view_number().saturating_add(1),
        };
        if target == self.ctx.view_number() {
            return;
        }
        let Some(payload) = self.signed_payload(ConsensusMessage::ChangeView {
            new_view_number: target,
            timestamp: (now_ms / 1_000) as u32,
            reason,
        }) else {
            return;
        };
        if let Err(err) = self.ctx.add_change_view(my_index, payload.clone(), target) {
            error!(target: "consensus", code = err.code(), %err, "could not record own vote");
            return;
        }
        info!(
            target: "consensus",
            height = self.ctx.block_index(),
            view = self.ctx.view_number(),
            new_view = target,
            %reason,
            "requesting view change"
        );
        actions.push_back(ConsensusAction::Broadcast(Box::new(payload)));
        self.state = MachineState::ViewChanging;
        if self.ctx.change_view_quorum(target) {
            self.do_advance_view(target, now_ms, actions);
        }
    }

    fn do_advance_view(
        &mut self,
        new_view: u8,
        now_ms: u64,
        actions: &mut VecDeque<ConsensusAction>,
    ) {
        info!(
            target: "consensus",
            height = self.ctx.block_index(),
            from_view = self.ctx.view_number(),
            to_view = new_view,
            "change view quorum reached"
        );
        if let Err(err) = self.ctx.advance_view(new_view, now_ms) {
            error!(target: "consensus", code = err.code(), %err, "view advance refused");
            return;
        }
        self.start_view(now_ms, actions);
    }

    fn on_timer(
        &mut self,
        block_index: u32,
        view_number: u8,
        now_ms: u64,
        actions: &mut VecDeque<ConsensusAction>,
    ) {
        // A timer armed for an earlier round was logically canceled when the
        // round moved on.
        if block_index != self.ctx.block_index() || view_number != self.ctx.view_number() {
            return;
        }
        match self.state {
            MachineState::BlockPersisted | MachineState::Idle => {}
            MachineState::CommitSent => {
                // The commit stands; keep the round alive and help stragglers.
                debug!(
                    target: "consensus",
                    height = block_index,
                    view = view_number,
                    "timeout while commit-locked, rebroadcasting round state"
                );
                self.reply_recovery(actions);
                actions.push_back(ConsensusAction::ArmTimer {
                    block_index,
                    view_number,
                    delay_ms: timeout_for_view(
                        view_number.saturating_add(1),
                        self.config.milliseconds_per_block,
                    ),
                });
            }
            _ => {
                warn!(
                    target: "consensus",
                    height = block_index,
                    view = view_number,
                    state = ?self.state,
                    "round timed out"
                );
                self.request_change_view(ChangeViewReason::Timeout, now_ms, actions);
                // Escalate on the same timer track: the next firing requests
                // an even later view, with exponentially larger spacing.
                let next_target = self
                    .my_index
                    .and_then(|i| self.ctx.requested_view(i))
                    .unwrap_or_else(|| view_number.saturating_add(1));
                actions.push_back(ConsensusAction::ArmTimer {
                    block_index,
                    view_number,
                    delay_ms: timeout_for_view(next_target, self.config.milliseconds_per_block),
                });
            }
        }
    }

    // --- Recovery ------------------------------------------------------------

    fn reply_recovery(&mut self, actions: &mut VecDeque<ConsensusAction>) {
        if self.my_index.is_none() {
            return;
        }
        let payloads = recovery::assemble(&self.ctx);
        let Some(payload) = self.signed_payload(ConsensusMessage::Recovery(payloads)) else {
            return;
        };
        actions.push_back(ConsensusAction::Broadcast(Box::new(payload)));
    }

    fn on_recovery(
        &mut self,
        payload: ConsensusPayload,
        now_ms: u64,
        actions: &mut VecDeque<ConsensusAction>,
    ) {
        let ConsensusMessage::Recovery(payloads) = payload.message else {
            return;
        };
        debug!(
            target: "consensus",
            from = payload.validator_index,
            change_views = payloads.change_views.len(),
            preparations = payloads.preparations.len(),
            commits = payloads.commits.len(),
            "replaying recovery message"
        );
        for nested in recovery::replay_order(payloads) {
            // Nothing nested is trusted transitively: each payload re-enters
            // the normal verification path.
            if let Err(err) = nested.verify_witness(&self.validators) {
                debug!(target: "consensus", code = err.code(), %err, "skipping recovery entry");
                continue;
            }
            self.dispatch_payload(nested, now_ms, actions, true);
        }
    }

    // --- Pool and persistence ------------------------------------------------

    fn on_transaction(&mut self, tx: Transaction) {
        let hash = tx.hash();
        if self.pool.contains_key(&hash) {
            return;
        }
        if self.pool.len() >= POOL_LIMIT {
            warn!(target: "consensus", "transaction pool full, dropping incoming transaction");
            return;
        }
        self.pool.insert(hash, tx);
    }

    fn on_block_persisted(
        &mut self,
        block: Block,
        own: bool,
        actions: &mut VecDeque<ConsensusAction>,
    ) {
        let height = block.header.height;
        if height < self.ctx.block_index() {
            return;
        }
        for tx in &block.transactions {
            self.pool.remove(&tx.hash());
        }
        self.pending_block = None;
        self.state = MachineState::BlockPersisted;
        info!(
            target: "consensus",
            height,
            hash = %hex::encode(&block.hash()[..8]),
            own,
            "block persisted"
        );
        actions.push_back(ConsensusAction::BeginHeight {
            block_index: height + 1,
        });
    }

    fn on_persist_failed(&mut self, block_index: u32, actions: &mut VecDeque<ConsensusAction>) {
        let Some(pending) = self.pending_block.clone() else {
            return;
        };
        if pending.header.height != block_index {
            return;
        }
        // Finalization is unconditional once the commit quorum was observed:
        // retry the same block. Repeated failure stalls the chain, so this is
        // the loudest non-fatal event the engine emits.
        error!(
            target: "consensus",
            height = block_index,
            "block persistence failed, retrying the finalized block"
        );
        actions.push_back(ConsensusAction::PersistBlock(Box::new(pending)));
    }

    fn balance_of(&self, tx: &Transaction) -> u64 {
        self.snapshot
            .as_ref()
            .map_or(0, |snapshot| snapshot.native_balance(&tx.sender))
    }

    fn signed_payload(&self, message: ConsensusMessage) -> Option<ConsensusPayload> {
        let index = self.my_index?;
        let keypair = self.keypair.as_ref()?;
        let mut payload = ConsensusPayload::new(
            self.ctx.block_index(),
            index,
            self.ctx.view_number(),
            message,
        );
        match payload.sign(keypair) {
            Ok(()) => Some(payload),
            Err(err) => {
                error!(target: "consensus", %err, "payload signing failed");
                None
            }
        }
    }
}
