// Path: crates/crypto/src/lib.rs
//! Cryptographic implementations for the Meridian kernel.
//!
//! Validator identity and payload witnesses use Ed25519 keys in libp2p's
//! protobuf envelope, so the same key material identifies a peer on the
//! network and a member of the committee. Hashing is SHA-256 throughout.

pub mod error;
pub mod hash;
pub mod sign;

pub use error::CryptoError;
pub use sign::{account_id_from_public_key, verify_signature, ValidatorKeypair};
