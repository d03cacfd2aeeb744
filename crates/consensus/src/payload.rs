// Path: crates/consensus/src/payload.rs
//! The consensus wire protocol: tagged message variants inside a signed
//! payload envelope.
//!
//! Wire layout of the envelope, via the canonical SCALE codec:
//! `[version:u8][block_index:u32 LE][validator_index:u8][view_number:u8]`
//! `[message discriminant:u8][message body][witness bytes]`.
//!
//! Every payload is verified (decode, bounds, witness) before it reaches the
//! round context; a payload that fails any check is dropped without mutating
//! consensus state.

use meridian_crypto::{CryptoError, ValidatorKeypair};
use meridian_types::app::{SigDomain, TxHash, ValidatorSet};
use meridian_types::codec;
use meridian_types::error::PayloadError;
use meridian_types::MAX_TRANSACTIONS_PER_BLOCK;
use parity_scale_codec::{Decode, Encode};
use std::fmt;

/// The payload envelope format version this node speaks.
pub const PAYLOAD_VERSION: u8 = 0;

/// Why a validator votes to abandon the current view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum ChangeViewReason {
    /// The round timed out without reaching the next stage.
    #[codec(index = 0x00)]
    Timeout,
    /// The primary's request was malformed or inconsistent.
    #[codec(index = 0x01)]
    InvalidRequest,
    /// The request referenced transactions this node does not hold.
    #[codec(index = 0x02)]
    TransactionMissing,
    /// A referenced transaction failed re-verification.
    #[codec(index = 0x03)]
    TransactionInvalid,
}

impl fmt::Display for ChangeViewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::InvalidRequest => "invalid-request",
            Self::TransactionMissing => "transaction-missing",
            Self::TransactionInvalid => "transaction-invalid",
        };
        f.write_str(s)
    }
}

/// The per-round payloads a recovery response replays to a lagging validator.
///
/// Each nested payload carries its own witness and re-enters the normal
/// verification path on receipt; nothing in a recovery message is trusted
/// transitively.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Default)]
pub struct RecoveryPayloads {
    /// The change-view votes seen this round, one per validator at most.
    pub change_views: Vec<ConsensusPayload>,
    /// The primary's request for the current view, if one was accepted.
    pub prepare_request: Option<Box<ConsensusPayload>>,
    /// The preparation endorsements collected for the current view.
    pub preparations: Vec<ConsensusPayload>,
    /// The commit signatures collected for the current view.
    pub commits: Vec<ConsensusPayload>,
}

/// A consensus protocol message, dispatched by a one-byte discriminant.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum ConsensusMessage {
    /// A validator's vote to abandon the current view.
    #[codec(index = 0x00)]
    ChangeView {
        /// The view the sender wants to move to.
        new_view_number: u8,
        /// UNIX seconds at which the vote was cast.
        timestamp: u32,
        /// Why the sender gave up on the view.
        reason: ChangeViewReason,
    },
    /// Sent only by the primary; defines the exact candidate block.
    #[codec(index = 0x20)]
    PrepareRequest {
        /// UNIX seconds for the candidate header.
        timestamp: u32,
        /// The primary's per-block nonce.
        nonce: u64,
        /// The ordered transaction hashes of the candidate block.
        transaction_hashes: Vec<TxHash>,
        /// The verification script identifying the next block's signers.
        next_consensus: Vec<u8>,
    },
    /// A backup's endorsement of a specific prepare request, referenced by
    /// payload hash to bound message size.
    #[codec(index = 0x21)]
    PrepareResponse {
        /// The hash of the endorsed `PrepareRequest` payload.
        preparation_hash: [u8; 32],
    },
    /// Sent once a validator has observed a preparation quorum; signs the
    /// final block header.
    #[codec(index = 0x30)]
    Commit {
        /// The signature over the candidate header's signing preimage.
        signature: Vec<u8>,
    },
    /// Brings a lagging validator's round state up to date.
    #[codec(index = 0x41)]
    Recovery(RecoveryPayloads),
}

/// The kind of a consensus message, for logging and per-kind bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A change-view vote.
    ChangeView,
    /// The primary's candidate definition.
    PrepareRequest,
    /// A backup's endorsement.
    PrepareResponse,
    /// A header commit signature.
    Commit,
    /// A recovery response.
    Recovery,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ChangeView => "change-view",
            Self::PrepareRequest => "prepare-request",
            Self::PrepareResponse => "prepare-response",
            Self::Commit => "commit",
            Self::Recovery => "recovery",
        };
        f.write_str(s)
    }
}

impl ConsensusMessage {
    /// The kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::ChangeView { .. } => MessageKind::ChangeView,
            Self::PrepareRequest { .. } => MessageKind::PrepareRequest,
            Self::PrepareResponse { .. } => MessageKind::PrepareResponse,
            Self::Commit { .. } => MessageKind::Commit,
            Self::Recovery(_) => MessageKind::Recovery,
        }
    }

    fn validate(&self, allow_recovery: bool) -> Result<(), PayloadError> {
        match self {
            Self::PrepareRequest {
                transaction_hashes, ..
            } => {
                if transaction_hashes.len() > MAX_TRANSACTIONS_PER_BLOCK {
                    return Err(PayloadError::MalformedPayload(format!(
                        "prepare request lists {} transactions, protocol maximum is {}",
                        transaction_hashes.len(),
                        MAX_TRANSACTIONS_PER_BLOCK
                    )));
                }
                Ok(())
            }
            Self::Recovery(payloads) => {
                if !allow_recovery {
                    return Err(PayloadError::MalformedPayload(
                        "recovery message nested inside a recovery message".into(),
                    ));
                }
                let committee_max = usize::from(u8::MAX);
                if payloads.change_views.len() > committee_max
                    || payloads.preparations.len() > committee_max
                    || payloads.commits.len() > committee_max
                {
                    return Err(PayloadError::MalformedPayload(
                        "recovery message exceeds committee bounds".into(),
                    ));
                }
                for (section, kind, nested) in Self::recovery_sections(payloads) {
                    if nested.message.kind() != kind {
                        return Err(PayloadError::MalformedPayload(format!(
                            "recovery section '{}' carries a {} payload",
                            section,
                            nested.message.kind()
                        )));
                    }
                    nested.message.validate(false)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn recovery_sections<'a>(
        payloads: &'a RecoveryPayloads,
    ) -> impl Iterator<Item = (&'static str, MessageKind, &'a ConsensusPayload)> + 'a {
        let request = payloads
            .prepare_request
            .iter()
            .map(|p| ("prepare_request", MessageKind::PrepareRequest, p.as_ref()));
        payloads
            .change_views
            .iter()
            .map(|p| ("change_views", MessageKind::ChangeView, p))
            .chain(request)
            .chain(
                payloads
                    .preparations
                    .iter()
                    .map(|p| ("preparations", MessageKind::PrepareResponse, p)),
            )
            .chain(
                payloads
                    .commits
                    .iter()
                    .map(|p| ("commits", MessageKind::Commit, p)),
            )
    }
}

/// The signed envelope every consensus message travels in.
///
/// Immutable once constructed and signed; verification happens before
/// acceptance into any round state.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ConsensusPayload {
    /// The envelope format version.
    pub version: u8,
    /// The height being agreed on.
    pub block_index: u32,
    /// The committee index of the sender.
    pub validator_index: u8,
    /// The sender's view at the time of sending.
    pub view_number: u8,
    /// The protocol message.
    pub message: ConsensusMessage,
    /// The sender's signature over the envelope's signing preimage.
    pub witness: Vec<u8>,
}

impl ConsensusPayload {
    /// Creates an unsigned payload for the given round and sender.
    pub fn new(
        block_index: u32,
        validator_index: u8,
        view_number: u8,
        message: ConsensusMessage,
    ) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            block_index,
            validator_index,
            view_number,
            message,
            witness: vec![],
        }
    }

    /// Serializes the payload to its canonical wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        codec::to_bytes_canonical(self)
    }

    /// Deserializes and bounds-checks a payload from wire bytes.
    ///
    /// Fails with [`PayloadError::MalformedPayload`] on unknown discriminants,
    /// truncated fields, trailing garbage, or variable-length fields above the
    /// protocol maxima.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        let payload: Self =
            codec::from_bytes_canonical(bytes).map_err(PayloadError::MalformedPayload)?;
        payload.validate()?;
        Ok(payload)
    }

    fn validate(&self) -> Result<(), PayloadError> {
        if self.version != PAYLOAD_VERSION {
            return Err(PayloadError::MalformedPayload(format!(
                "unsupported payload version {}",
                self.version
            )));
        }
        self.message.validate(true)
    }

    /// The payload identity hash, over the full envelope including the
    /// witness. `PrepareResponse.preparation_hash` references this.
    pub fn hash(&self) -> [u8; 32] {
        meridian_types::app::sha256(&self.to_bytes())
    }

    /// The domain-separated preimage covered by the witness.
    pub fn signing_preimage(&self) -> Vec<u8> {
        codec::to_bytes_canonical(&(
            SigDomain::ConsensusPayloadV1,
            self.version,
            self.block_index,
            self.validator_index,
            self.view_number,
            &self.message,
        ))
    }

    /// Signs the payload, filling in the witness.
    pub fn sign(&mut self, keypair: &ValidatorKeypair) -> Result<(), CryptoError> {
        self.witness = keypair.sign(&self.signing_preimage())?;
        Ok(())
    }

    /// Verifies the witness against the sender's public key in the committee
    /// for this payload's height.
    pub fn verify_witness(&self, validators: &ValidatorSet) -> Result<(), PayloadError> {
        let validator =
            validators
                .get(self.validator_index)
                .ok_or(PayloadError::UnknownValidator {
                    validator_index: self.validator_index,
                    committee: validators.len() as u8,
                })?;
        meridian_crypto::verify_signature(
            &validator.public_key,
            &self.signing_preimage(),
            &self.witness,
        )
        .map_err(|_| PayloadError::InvalidWitness {
            validator_index: self.validator_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::app::Validator;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn keypair(seed: u64) -> ValidatorKeypair {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut secret = [0u8; 32];
        rng.fill_bytes(&mut secret);
        ValidatorKeypair::from_secret_bytes(secret).unwrap()
    }

    fn committee() -> (ValidatorSet, Vec<ValidatorKeypair>) {
        let keypairs: Vec<_> = (0..4u64).map(|i| keypair(100 + i)).collect();
        let validators = keypairs
            .iter()
            .map(|kp| Validator {
                account_id: kp.account_id(),
                public_key: kp.public_key_bytes(),
            })
            .collect();
        (ValidatorSet::new(validators).unwrap(), keypairs)
    }

    fn sample_messages() -> Vec<ConsensusMessage> {
        vec![
            ConsensusMessage::ChangeView {
                new_view_number: 1,
                timestamp: 1_700_000_000,
                reason: ChangeViewReason::Timeout,
            },
            ConsensusMessage::PrepareRequest {
                timestamp: 1_700_000_000,
                nonce: 0xDEAD_BEEF,
                transaction_hashes: vec![[1u8; 32], [2u8; 32]],
                next_consensus: vec![0xAB, 0xCD],
            },
            ConsensusMessage::PrepareResponse {
                preparation_hash: [7u8; 32],
            },
            ConsensusMessage::Commit {
                signature: vec![9u8; 64],
            },
            ConsensusMessage::Recovery(RecoveryPayloads::default()),
        ]
    }

    #[test]
    fn every_variant_round_trips() {
        for message in sample_messages() {
            let payload = ConsensusPayload::new(10, 2, 0, message);
            let decoded = ConsensusPayload::from_bytes(&payload.to_bytes()).unwrap();
            assert_eq!(payload, decoded);
        }
    }

    #[test]
    fn discriminants_are_stable() {
        let cases = [
            (sample_messages().remove(0), 0x00u8),
            (sample_messages().remove(1), 0x20),
            (sample_messages().remove(2), 0x21),
            (sample_messages().remove(3), 0x30),
            (sample_messages().remove(4), 0x41),
        ];
        for (message, discriminant) in cases {
            let bytes = codec::to_bytes_canonical(&message);
            assert_eq!(bytes[0], discriminant);
        }
    }

    #[test]
    fn envelope_layout_matches_wire_format() {
        let payload = ConsensusPayload::new(
            0x0102_0304,
            5,
            6,
            ConsensusMessage::PrepareResponse {
                preparation_hash: [7u8; 32],
            },
        );
        let bytes = payload.to_bytes();
        assert_eq!(bytes[0], PAYLOAD_VERSION);
        // u32 block index, little endian.
        assert_eq!(&bytes[1..5], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(bytes[5], 5); // validator index
        assert_eq!(bytes[6], 6); // view number
        assert_eq!(bytes[7], 0x21); // message discriminant
    }

    #[test]
    fn unknown_discriminant_is_malformed() {
        let payload = ConsensusPayload::new(
            1,
            0,
            0,
            ConsensusMessage::Commit {
                signature: vec![1, 2, 3],
            },
        );
        let mut bytes = payload.to_bytes();
        bytes[7] = 0x7F;
        let err = ConsensusPayload::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, PayloadError::MalformedPayload(_)));
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let payload = ConsensusPayload::new(
            1,
            0,
            0,
            ConsensusMessage::PrepareResponse {
                preparation_hash: [7u8; 32],
            },
        );
        let bytes = payload.to_bytes();
        let err = ConsensusPayload::from_bytes(&bytes[..bytes.len() - 4]).unwrap_err();
        assert!(matches!(err, PayloadError::MalformedPayload(_)));
    }

    #[test]
    fn trailing_garbage_is_malformed() {
        let payload = ConsensusPayload::new(
            1,
            0,
            0,
            ConsensusMessage::Commit { signature: vec![] },
        );
        let mut bytes = payload.to_bytes();
        bytes.push(0x00);
        assert!(ConsensusPayload::from_bytes(&bytes).is_err());
    }

    #[test]
    fn oversized_transaction_list_is_rejected() {
        let payload = ConsensusPayload::new(
            1,
            0,
            0,
            ConsensusMessage::PrepareRequest {
                timestamp: 0,
                nonce: 0,
                transaction_hashes: vec![[0u8; 32]; MAX_TRANSACTIONS_PER_BLOCK + 1],
                next_consensus: vec![],
            },
        );
        let err = ConsensusPayload::from_bytes(&payload.to_bytes()).unwrap_err();
        assert!(matches!(err, PayloadError::MalformedPayload(_)));
    }

    #[test]
    fn nested_recovery_is_rejected() {
        let inner = ConsensusPayload::new(
            1,
            0,
            0,
            ConsensusMessage::Recovery(RecoveryPayloads::default()),
        );
        let outer = ConsensusPayload::new(
            1,
            0,
            0,
            ConsensusMessage::Recovery(RecoveryPayloads {
                change_views: vec![inner],
                ..Default::default()
            }),
        );
        let err = ConsensusPayload::from_bytes(&outer.to_bytes()).unwrap_err();
        assert!(matches!(err, PayloadError::MalformedPayload(_)));
    }

    #[test]
    fn recovery_section_kinds_are_enforced() {
        let misplaced = ConsensusPayload::new(
            1,
            0,
            0,
            ConsensusMessage::Commit { signature: vec![] },
        );
        let outer = ConsensusPayload::new(
            1,
            0,
            0,
            ConsensusMessage::Recovery(RecoveryPayloads {
                change_views: vec![misplaced],
                ..Default::default()
            }),
        );
        assert!(ConsensusPayload::from_bytes(&outer.to_bytes()).is_err());
    }

    #[test]
    fn witness_signs_and_verifies() {
        let (set, keypairs) = committee();
        let mut payload = ConsensusPayload::new(
            10,
            1,
            0,
            ConsensusMessage::PrepareResponse {
                preparation_hash: [7u8; 32],
            },
        );
        payload.sign(&keypairs[1]).unwrap();
        payload.verify_witness(&set).unwrap();
    }

    #[test]
    fn witness_from_wrong_key_is_rejected() {
        let (set, keypairs) = committee();
        let mut payload = ConsensusPayload::new(
            10,
            1,
            0,
            ConsensusMessage::Commit {
                signature: vec![1, 2, 3],
            },
        );
        // Signed by validator 2 but claiming index 1.
        payload.sign(&keypairs[2]).unwrap();
        let err = payload.verify_witness(&set).unwrap_err();
        assert!(matches!(
            err,
            PayloadError::InvalidWitness { validator_index: 1 }
        ));
    }

    #[test]
    fn witness_covers_round_identity() {
        let (set, keypairs) = committee();
        let mut payload = ConsensusPayload::new(
            10,
            0,
            0,
            ConsensusMessage::Commit { signature: vec![] },
        );
        payload.sign(&keypairs[0]).unwrap();
        payload.view_number = 1;
        assert!(payload.verify_witness(&set).is_err());
    }

    #[test]
    fn out_of_range_index_is_unknown_validator() {
        let (set, _) = committee();
        let payload = ConsensusPayload::new(
            10,
            9,
            0,
            ConsensusMessage::Commit { signature: vec![] },
        );
        let err = payload.verify_witness(&set).unwrap_err();
        assert!(matches!(
            err,
            PayloadError::UnknownValidator {
                validator_index: 9,
                ..
            }
        ));
    }
}
