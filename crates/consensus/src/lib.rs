// Path: crates/consensus/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]
//! dBFT consensus engine for the Meridian kernel.
//!
//! A fixed committee of validators agrees on blocks round by round: a
//! deterministically selected primary proposes a candidate, backups endorse
//! it, and a quorum of commit signatures finalizes it. Failed rounds are
//! abandoned through view changes with exponential timeout backoff.
//!
//! The engine is split into a pure, single-threaded state machine
//! ([`machine::DbftMachine`]) that turns events into actions, and an async
//! [`service::ConsensusService`] that owns the event queue, timers, and the
//! store/gossip collaborators.

pub mod context;
pub mod machine;
pub mod payload;
pub mod recovery;
pub mod service;
pub mod verification;

pub use context::RoundContext;
pub use machine::{ConsensusAction, ConsensusEvent, DbftMachine, MachineState};
pub use payload::{ChangeViewReason, ConsensusMessage, ConsensusPayload, MessageKind};
pub use service::{ConsensusService, InboundEvent};
pub use verification::TransactionVerificationContext;
