// Path: crates/consensus/src/service.rs
//! The async driver that owns the state machine.
//!
//! One task consumes an ordered inbound queue (payload bytes, transactions,
//! externally persisted blocks) plus the round timer, feeds events into the
//! [`DbftMachine`], and executes the actions it returns against the store and
//! gossip collaborators. No other task ever touches the machine, which is
//! what makes its invariants hold.

use crate::machine::{ConsensusAction, ConsensusEvent, DbftMachine};
use crate::payload::ConsensusPayload;
use meridian_api::chain::BlockchainStore;
use meridian_api::network::PayloadGossip;
use meridian_types::app::{Block, Transaction};
use meridian_types::error::ErrorCode;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Duration, Instant};
use tracing::{debug, info, warn};

/// How long to wait before retrying a failed block persistence.
const PERSIST_RETRY_DELAY_MS: u64 = 500;

/// Events delivered to the consensus service by the node's other components.
pub enum InboundEvent {
    /// Raw consensus payload bytes from the network, not yet deserialized.
    PayloadBytes(Vec<u8>),
    /// A transaction received from the mempool gossip or RPC surface.
    Transaction(Transaction),
    /// A block persisted by the sync pipeline rather than this node's round.
    ExternalBlock(Box<Block>),
}

struct ArmedTimer {
    block_index: u32,
    view_number: u8,
    deadline: Instant,
}

/// The consensus actor: single-threaded owner of the dBFT state machine.
pub struct ConsensusService {
    machine: DbftMachine,
    store: Arc<dyn BlockchainStore>,
    gossip: Arc<dyn PayloadGossip>,
    inbound: mpsc::Receiver<InboundEvent>,
    timer: Option<ArmedTimer>,
}

impl ConsensusService {
    /// Wires a machine to its collaborators and inbound queue.
    pub fn new(
        machine: DbftMachine,
        store: Arc<dyn BlockchainStore>,
        gossip: Arc<dyn PayloadGossip>,
        inbound: mpsc::Receiver<InboundEvent>,
    ) -> Self {
        Self {
            machine,
            store,
            gossip,
            inbound,
            timer: None,
        }
    }

    /// Runs the consensus loop until the inbound channel closes.
    pub async fn run(mut self) {
        let next_height = self.store.current_height().await + 1;
        let actions = self.start_height(next_height).await;
        self.drive(actions).await;

        loop {
            let deadline = self.timer.as_ref().map(|t| t.deadline);
            tokio::select! {
                maybe_event = self.inbound.recv() => match maybe_event {
                    Some(event) => self.on_inbound(event).await,
                    None => {
                        info!(target: "consensus", "inbound channel closed, consensus service stopping");
                        break;
                    }
                },
                _ = Self::wait(deadline), if deadline.is_some() => {
                    if let Some(timer) = self.timer.take() {
                        let actions = self.machine.handle_event(
                            ConsensusEvent::TimerFired {
                                block_index: timer.block_index,
                                view_number: timer.view_number,
                            },
                            now_ms(),
                        );
                        self.drive(actions).await;
                    }
                }
            }
        }
    }

    async fn wait(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => futures::future::pending().await,
        }
    }

    async fn on_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::PayloadBytes(bytes) => {
                // Deserialize and authenticate before anything reaches the
                // machine; protocol errors are dropped here and never mutate
                // round state.
                let payload = match ConsensusPayload::from_bytes(&bytes) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(target: "consensus", code = err.code(), %err, "dropping payload");
                        return;
                    }
                };
                if let Err(err) = payload.verify_witness(self.machine.validators()) {
                    warn!(target: "consensus", code = err.code(), %err, "dropping payload");
                    return;
                }
                let actions = self
                    .machine
                    .handle_event(ConsensusEvent::Payload(payload), now_ms());
                self.drive(actions).await;
            }
            InboundEvent::Transaction(tx) => {
                // Script and witness checks run here, outside the round loop;
                // the machine only ever sees verified transactions.
                if let Err(err) = self.store.verify_transaction(&tx).await {
                    debug!(target: "consensus", code = err.code(), %err, "rejecting transaction");
                    return;
                }
                let actions = self
                    .machine
                    .handle_event(ConsensusEvent::TransactionReceived(tx), now_ms());
                self.drive(actions).await;
            }
            InboundEvent::ExternalBlock(block) => {
                let actions = self.machine.handle_event(
                    ConsensusEvent::BlockPersisted { block, own: false },
                    now_ms(),
                );
                self.drive(actions).await;
            }
        }
    }

    /// Executes machine actions, feeding any follow-up events straight back
    /// in. Iterative rather than recursive: persistence success, for example,
    /// immediately yields the next height's start actions.
    async fn drive(&mut self, mut actions: VecDeque<ConsensusAction>) {
        while let Some(action) = actions.pop_front() {
            match action {
                ConsensusAction::Broadcast(payload) => {
                    if let Err(err) = self.gossip.broadcast(payload.to_bytes()).await {
                        // Fire-and-forget: a lost payload costs at most a
                        // view change.
                        warn!(target: "consensus", %err, "broadcast failed");
                    }
                }
                ConsensusAction::ArmTimer {
                    block_index,
                    view_number,
                    delay_ms,
                } => {
                    self.timer = Some(ArmedTimer {
                        block_index,
                        view_number,
                        deadline: Instant::now() + Duration::from_millis(delay_ms),
                    });
                }
                ConsensusAction::PersistBlock(block) => {
                    let height = block.header.height;
                    match self.store.persist_block((*block).clone()).await {
                        Ok(()) => {
                            let follow_up = self.machine.handle_event(
                                ConsensusEvent::BlockPersisted { block, own: true },
                                now_ms(),
                            );
                            actions.extend(follow_up);
                        }
                        Err(err) => {
                            warn!(target: "consensus", code = err.code(), %err, height, "persistence failed");
                            sleep(Duration::from_millis(PERSIST_RETRY_DELAY_MS)).await;
                            let follow_up = self.machine.handle_event(
                                ConsensusEvent::PersistFailed {
                                    block_index: height,
                                },
                                now_ms(),
                            );
                            actions.extend(follow_up);
                        }
                    }
                }
                ConsensusAction::BeginHeight { block_index } => {
                    let follow_up = self.start_height(block_index).await;
                    actions.extend(follow_up);
                }
            }
        }
    }

    async fn start_height(&mut self, block_index: u32) -> VecDeque<ConsensusAction> {
        let prev_hash = self.store.current_hash().await;
        let snapshot = self.store.snapshot().await;
        self.machine
            .start_height(block_index, prev_hash, snapshot, now_ms())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::DbftMachine;
    use crate::payload::ConsensusMessage;
    use async_trait::async_trait;
    use meridian_api::chain::StateSnapshot;
    use meridian_api::network::GossipError;
    use meridian_crypto::ValidatorKeypair;
    use meridian_types::app::{AccountId, BlockHash, Validator, ValidatorSet};
    use meridian_types::config::ConsensusConfig;
    use meridian_types::error::{StoreError, VerifyError};
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};
    use std::sync::Mutex;

    struct NullSnapshot;

    impl StateSnapshot for NullSnapshot {
        fn native_balance(&self, _account: &AccountId) -> u64 {
            u64::MAX
        }
    }

    struct TestStore;

    #[async_trait]
    impl BlockchainStore for TestStore {
        async fn current_height(&self) -> u32 {
            0
        }
        async fn current_hash(&self) -> BlockHash {
            [0u8; 32]
        }
        async fn snapshot(&self) -> Arc<dyn StateSnapshot> {
            Arc::new(NullSnapshot)
        }
        async fn verify_transaction(&self, _tx: &Transaction) -> Result<(), VerifyError> {
            Ok(())
        }
        async fn persist_block(&self, _block: Block) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingGossip {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl PayloadGossip for RecordingGossip {
        async fn broadcast(&self, payload: Vec<u8>) -> Result<(), GossipError> {
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }
    }

    fn committee() -> (ValidatorSet, Vec<ValidatorKeypair>) {
        let keypairs: Vec<_> = (0..4u64)
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(70 + i);
                let mut secret = [0u8; 32];
                rng.fill_bytes(&mut secret);
                ValidatorKeypair::from_secret_bytes(secret).unwrap()
            })
            .collect();
        let validators = keypairs
            .iter()
            .map(|kp| Validator {
                account_id: kp.account_id(),
                public_key: kp.public_key_bytes(),
            })
            .collect();
        (ValidatorSet::new(validators).unwrap(), keypairs)
    }

    #[tokio::test]
    async fn backup_times_out_and_votes_to_change_view() {
        let (set, mut keypairs) = committee();
        let config = ConsensusConfig {
            milliseconds_per_block: 20,
            max_transactions_per_block: 16,
            private_net: true,
        };
        // Validator 0 is a backup at height 1 (primary is index 1).
        let machine = DbftMachine::new(config, set.clone(), Some(keypairs.remove(0))).unwrap();
        let gossip = Arc::new(RecordingGossip::default());
        let (sender, receiver) = mpsc::channel(8);
        let service = ConsensusService::new(machine, Arc::new(TestStore), gossip.clone(), receiver);
        let handle = tokio::spawn(service.run());

        // Give the view-0 timer time to fire, then shut the service down.
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(sender);
        handle.await.unwrap();

        let sent = gossip.sent.lock().unwrap();
        assert!(!sent.is_empty(), "timeout should have broadcast a vote");
        let payload = ConsensusPayload::from_bytes(&sent[0]).unwrap();
        payload.verify_witness(&set).unwrap();
        assert!(matches!(
            payload.message,
            ConsensusMessage::ChangeView {
                new_view_number: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn malformed_payload_bytes_are_dropped() {
        let (set, mut keypairs) = committee();
        let config = ConsensusConfig {
            milliseconds_per_block: 60_000,
            max_transactions_per_block: 16,
            private_net: true,
        };
        let machine = DbftMachine::new(config, set, Some(keypairs.remove(0))).unwrap();
        let gossip = Arc::new(RecordingGossip::default());
        let (sender, receiver) = mpsc::channel(8);
        let service = ConsensusService::new(machine, Arc::new(TestStore), gossip.clone(), receiver);
        let handle = tokio::spawn(service.run());

        sender
            .send(InboundEvent::PayloadBytes(vec![0xFF, 0x01, 0x02]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(sender);
        handle.await.unwrap();

        // A backup with a long timer and a garbage payload says nothing.
        assert!(gossip.sent.lock().unwrap().is_empty());
    }
}
