// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Meridian Kernel Types
//!
//! This crate is the foundational library for the Meridian kernel, containing
//! all core data structures, error types, and configuration objects.
//!
//! ## Architectural Role
//!
//! As the base crate, `meridian-types` has minimal dependencies and is itself
//! a dependency for almost every other crate in the workspace. This structure
//! prevents circular dependencies and provides a stable, canonical definition
//! for shared types like `Block`, `Transaction`, `ValidatorSet`, and the
//! error enums.

/// The maximum number of transactions a block (and therefore a
/// `PrepareRequest` hash list) may reference. Bounds the memory a malicious
/// peer can force a node to allocate while decoding a payload.
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 512;

/// A top-level, crate-wide `Result` type alias with a default error type.
pub type Result<T, E = crate::error::ConsensusError> = std::result::Result<T, E>;

/// Core application-level data structures like `Block`, `Transaction`, and
/// the canonical validator set.
pub mod app;
/// The canonical, deterministic binary codec for consensus-critical state.
pub mod codec;
/// Shared configuration structures consumed by the node and consensus crates.
pub mod config;
/// A unified set of all error types used across the workspace.
pub mod error;
