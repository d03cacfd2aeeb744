// Path: crates/types/src/codec.rs

//! Defines the canonical, deterministic binary codec for all consensus-critical data.
//!
//! This module provides thin wrappers around `parity-scale-codec` (SCALE).
//! By centralizing the codec logic here in the base `types` crate, we ensure
//! that every component uses the exact same serialization format for payloads,
//! headers, and state, preventing consensus failures due to different binary
//! representations of the same data.

use parity_scale_codec::{Decode, DecodeAll, Encode};

/// Encodes a value into its canonical byte representation using SCALE.
///
/// This function must be used for all data that crosses the wire or is
/// included in a hash for signing.
pub fn to_bytes_canonical<T: Encode>(v: &T) -> Vec<u8> {
    v.encode()
}

/// Decodes a value from a canonical byte representation using SCALE.
///
/// Decoding is strict: trailing bytes after a complete value are an error.
/// This is critical for preventing malleable encodings of the same payload
/// from being processed in a consensus context.
pub fn from_bytes_canonical<T: Decode>(b: &[u8]) -> Result<T, String> {
    T::decode_all(&mut &*b).map_err(|e| format!("canonical decode failed: {}", e))
}
