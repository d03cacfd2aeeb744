// Path: crates/crypto/src/sign/mod.rs
//! Ed25519 signing for validator identity, payload witnesses, and commits.

use crate::error::CryptoError;
use crate::hash::sha256;
use libp2p::identity::{Keypair, PublicKey};
use meridian_types::app::AccountId;

/// The signing identity of a validator.
///
/// Wraps a libp2p Ed25519 keypair so the committee key doubles as the node's
/// network identity. The secret key never leaves this struct.
pub struct ValidatorKeypair {
    keypair: Keypair,
}

impl ValidatorKeypair {
    /// Generates a fresh Ed25519 keypair.
    pub fn generate() -> Self {
        Self {
            keypair: Keypair::generate_ed25519(),
        }
    }

    /// Derives a keypair from a 32-byte secret. Used for deterministic
    /// private-net committees and tests.
    pub fn from_secret_bytes(mut secret: [u8; 32]) -> Result<Self, CryptoError> {
        let keypair = Keypair::ed25519_from_bytes(&mut secret)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { keypair })
    }

    /// The protobuf-encoded public key, as carried in the validator set.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.keypair.public().encode_protobuf()
    }

    /// The stable account identifier derived from this key.
    pub fn account_id(&self) -> AccountId {
        account_id_from_public_key(&self.public_key_bytes())
    }

    /// Signs a message with the validator's secret key.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.keypair
            .sign(message)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))
    }
}

/// Derives the canonical `AccountId` from a protobuf-encoded public key.
///
/// This is the single source of truth for on-chain identity: the account is
/// the SHA-256 digest of the encoded key.
pub fn account_id_from_public_key(public_key: &[u8]) -> AccountId {
    AccountId(sha256(public_key))
}

/// Verifies a signature against a protobuf-encoded public key.
pub fn verify_signature(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let pk = PublicKey::try_decode_protobuf(public_key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    if pk.verify(message, signature) {
        Ok(())
    } else {
        Err(CryptoError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn seeded(seed: u64) -> ValidatorKeypair {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut secret = [0u8; 32];
        rng.fill_bytes(&mut secret);
        ValidatorKeypair::from_secret_bytes(secret).unwrap()
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = seeded(1);
        let msg = b"round 7, view 0";
        let sig = kp.sign(msg).unwrap();
        verify_signature(&kp.public_key_bytes(), msg, &sig).unwrap();
    }

    #[test]
    fn verification_rejects_wrong_key() {
        let kp = seeded(1);
        let other = seeded(2);
        let sig = kp.sign(b"hello").unwrap();
        let err = verify_signature(&other.public_key_bytes(), b"hello", &sig).unwrap_err();
        assert!(matches!(err, CryptoError::VerificationFailed));
    }

    #[test]
    fn verification_rejects_tampered_message() {
        let kp = seeded(3);
        let sig = kp.sign(b"block 10").unwrap();
        assert!(verify_signature(&kp.public_key_bytes(), b"block 11", &sig).is_err());
    }

    #[test]
    fn account_id_is_stable_per_key() {
        let kp = seeded(4);
        assert_eq!(kp.account_id(), kp.account_id());
        assert_ne!(kp.account_id(), seeded(5).account_id());
    }

    #[test]
    fn secret_derivation_is_deterministic() {
        assert_eq!(seeded(9).account_id(), seeded(9).account_id());
    }
}
