// Path: crates/types/src/error/mod.rs
//! Core error types for the Meridian kernel.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Protocol-level errors raised while decoding or authenticating a consensus
/// payload. Always recoverable: the payload is dropped and logged without
/// mutating any consensus state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// The payload bytes did not decode to a known, well-formed message.
    #[error("Malformed consensus payload: {0}")]
    MalformedPayload(String),
    /// The payload's witness did not verify against the sender's public key.
    #[error("Invalid witness for validator index {validator_index}")]
    InvalidWitness {
        /// The claimed validator index of the sender.
        validator_index: u8,
    },
    /// The payload's validator index is outside the committee.
    #[error("Unknown validator index {validator_index} (committee size {committee})")]
    UnknownValidator {
        /// The claimed validator index of the sender.
        validator_index: u8,
        /// The size of the current committee.
        committee: u8,
    },
    /// The payload references a view that this node has already abandoned.
    #[error("Stale view {got}, current view is {current}")]
    StaleView {
        /// The view this node is currently in.
        current: u8,
        /// The view referenced by the payload.
        got: u8,
    },
    /// The payload references a height other than the one being agreed on.
    #[error("Payload for height {got}, current round is height {expected}")]
    WrongHeight {
        /// The height of the round in progress.
        expected: u32,
        /// The height referenced by the payload.
        got: u32,
    },
}

impl ErrorCode for PayloadError {
    fn code(&self) -> &'static str {
        match self {
            Self::MalformedPayload(_) => "PAYLOAD_MALFORMED",
            Self::InvalidWitness { .. } => "PAYLOAD_INVALID_WITNESS",
            Self::UnknownValidator { .. } => "PAYLOAD_UNKNOWN_VALIDATOR",
            Self::StaleView { .. } => "PAYLOAD_STALE_VIEW",
            Self::WrongHeight { .. } => "PAYLOAD_WRONG_HEIGHT",
        }
    }
}

/// Errors raised by the consensus round context and state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsensusError {
    /// A validator already has an entry in the relevant per-round slot.
    /// The first message wins; later ones must not overwrite it.
    #[error("Duplicate {kind} from validator index {validator_index}")]
    DuplicateMessage {
        /// The kind of message that was duplicated.
        kind: &'static str,
        /// The validator that sent the duplicate.
        validator_index: u8,
    },
    /// A preparation or commit arrived before any candidate block is known.
    #[error("No candidate block registered for the current round")]
    MissingCandidate,
    /// A message endorsed a candidate hash other than the locked one.
    #[error("Candidate hash mismatch: expected {expected}, got {got}")]
    CandidateMismatch {
        /// Hex digest of the locked candidate hash.
        expected: String,
        /// Hex digest of the endorsed hash.
        got: String,
    },
    /// A `PrepareRequest` came from a validator other than the round's primary.
    #[error("Invalid primary: expected index {expected}, got {got}")]
    InvalidPrimary {
        /// The primary index derived for this round.
        expected: u8,
        /// The index the request actually came from.
        got: u8,
    },
    /// A commit signature did not verify against the candidate block hash.
    #[error("Invalid commit signature from validator index {validator_index}")]
    InvalidCommitSignature {
        /// The validator whose commit failed verification.
        validator_index: u8,
    },
    /// A height transition went backwards or stood still.
    #[error("Invalid height transition from {current} to {requested}")]
    InvalidHeightTransition {
        /// The height of the round in progress.
        current: u32,
        /// The requested new height.
        requested: u32,
    },
    /// Programming-error class. Logged and ignored in production, since a
    /// crash removes a validator from the committee and reduces fault
    /// tolerance.
    #[error("Consensus invariant violated: {0}")]
    InvariantViolation(String),
}

impl ErrorCode for ConsensusError {
    fn code(&self) -> &'static str {
        match self {
            Self::DuplicateMessage { .. } => "CONSENSUS_DUPLICATE_MESSAGE",
            Self::MissingCandidate => "CONSENSUS_MISSING_CANDIDATE",
            Self::CandidateMismatch { .. } => "CONSENSUS_CANDIDATE_MISMATCH",
            Self::InvalidPrimary { .. } => "CONSENSUS_INVALID_PRIMARY",
            Self::InvalidCommitSignature { .. } => "CONSENSUS_INVALID_COMMIT_SIGNATURE",
            Self::InvalidHeightTransition { .. } => "CONSENSUS_INVALID_HEIGHT_TRANSITION",
            Self::InvariantViolation(_) => "CONSENSUS_INVARIANT_VIOLATION",
        }
    }
}

/// Errors raised while verifying a transaction for inclusion in a candidate
/// block. Recoverable: the offending transaction is excluded; if discovered
/// while reviewing a primary's request, the round view-changes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// The transaction consumes an input already consumed this round.
    #[error("Transaction conflicts with an already-admitted input")]
    InputConflict,
    /// Admitting the transaction would push the sender's cumulative
    /// native-asset commitment above their balance at round start.
    #[error("Sender balance exceeded: committed {committed} + {requested} > available {available}")]
    BalanceExceeded {
        /// Native-asset amount already committed by this sender this round.
        committed: u64,
        /// The amount the rejected transaction would add.
        requested: u64,
        /// The sender's balance in the round-start snapshot.
        available: u64,
    },
    /// The witness script was rejected by the script verifier.
    #[error("Witness script rejected: {0}")]
    ScriptRejected(String),
    /// A transaction referenced by hash is not present locally.
    #[error("Referenced transaction not found in the local pool")]
    UnknownTransaction,
}

impl ErrorCode for VerifyError {
    fn code(&self) -> &'static str {
        match self {
            Self::InputConflict => "VERIFY_INPUT_CONFLICT",
            Self::BalanceExceeded { .. } => "VERIFY_BALANCE_EXCEEDED",
            Self::ScriptRejected(_) => "VERIFY_SCRIPT_REJECTED",
            Self::UnknownTransaction => "VERIFY_UNKNOWN_TRANSACTION",
        }
    }
}

/// Errors related to block structure and handoff to storage.
#[derive(Debug, Error)]
pub enum BlockError {
    /// The block's height is incorrect.
    #[error("Invalid block height. Expected {expected}, got {got}")]
    InvalidHeight {
        /// The expected block height.
        expected: u32,
        /// The height of the received block.
        got: u32,
    },
    /// The block's `prev_hash` does not match the hash of the previous block.
    #[error("Mismatched previous block hash. Expected {expected}, got {got}")]
    MismatchedPrevHash {
        /// The expected hash of the previous block.
        expected: String,
        /// The `prev_hash` from the received block.
        got: String,
    },
    /// The aggregated witness does not carry a quorum of valid signatures.
    #[error("Insufficient block witness: {got} valid signatures, quorum is {quorum}")]
    InsufficientWitness {
        /// The number of valid signatures present.
        got: usize,
        /// The quorum required for finality.
        quorum: usize,
    },
    /// A generic, unspecified block validation error.
    #[error("Invalid block: {0}")]
    Invalid(String),
}

impl ErrorCode for BlockError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidHeight { .. } => "BLOCK_INVALID_HEIGHT",
            Self::MismatchedPrevHash { .. } => "BLOCK_MISMATCHED_PREV_HASH",
            Self::InsufficientWitness { .. } => "BLOCK_INSUFFICIENT_WITNESS",
            Self::Invalid(_) => "BLOCK_INVALID",
        }
    }
}

/// Errors raised by the blockchain store collaborator.
///
/// Persistence failures are high severity: repeated failure stalls the chain.
/// They are nevertheless recoverable; consensus retries the same height.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Writing the block to storage failed.
    #[error("Block persistence failed: {0}")]
    Persist(String),
    /// The block failed the store's own validation.
    #[error(transparent)]
    Block(#[from] BlockError),
    /// A backend error occurred.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Persist(_) => "STORE_PERSIST_FAILED",
            Self::Block(_) => "STORE_BLOCK_INVALID",
            Self::Backend(_) => "STORE_BACKEND_ERROR",
        }
    }
}

/// Errors raised while loading or validating node configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// dBFT requires at least four validators to tolerate one fault.
    #[error("Committee too small: got {got} validators, need at least 4")]
    CommitteeTooSmall {
        /// The number of validators configured.
        got: usize,
    },
    /// The committee cannot exceed the one-byte validator index space.
    #[error("Committee too large: got {got} validators, maximum is 255")]
    CommitteeTooLarge {
        /// The number of validators configured.
        got: usize,
    },
    /// The base block time must be positive.
    #[error("milliseconds_per_block must be greater than zero")]
    InvalidBlockTime,
    /// The per-block transaction cap must be positive and within protocol bounds.
    #[error("Invalid max_transactions_per_block: {0}")]
    InvalidTransactionCap(usize),
    /// The configuration file could not be read or parsed.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::CommitteeTooSmall { .. } => "CONFIG_COMMITTEE_TOO_SMALL",
            Self::CommitteeTooLarge { .. } => "CONFIG_COMMITTEE_TOO_LARGE",
            Self::InvalidBlockTime => "CONFIG_INVALID_BLOCK_TIME",
            Self::InvalidTransactionCap(_) => "CONFIG_INVALID_TX_CAP",
            Self::Load(_) => "CONFIG_LOAD_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            PayloadError::MalformedPayload("x".into()).code(),
            "PAYLOAD_MALFORMED"
        );
        assert_eq!(
            ConsensusError::DuplicateMessage {
                kind: "preparation",
                validator_index: 1
            }
            .code(),
            "CONSENSUS_DUPLICATE_MESSAGE"
        );
        assert_eq!(VerifyError::InputConflict.code(), "VERIFY_INPUT_CONFLICT");
    }
}
