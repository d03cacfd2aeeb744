// Path: crates/crypto/src/error.rs
//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors raised by key handling, signing, and verification.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The provided key bytes did not decode to a supported key.
    #[error("Invalid key material: {0}")]
    InvalidKey(String),
    /// Producing a signature failed.
    #[error("Signing failed: {0}")]
    SigningFailed(String),
    /// The signature did not verify against the message and public key.
    #[error("Signature verification failed")]
    VerificationFailed,
    /// A digest had an unexpected length.
    #[error("Invalid hash length: expected {expected}, got {got}")]
    InvalidHashLength {
        /// The expected digest length in bytes.
        expected: usize,
        /// The observed digest length in bytes.
        got: usize,
    },
}
