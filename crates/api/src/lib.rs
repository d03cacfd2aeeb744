// Path: crates/api/src/lib.rs

//! # Meridian API Crate Lints
//!
//! This crate enforces a strict set of lints to ensure high-quality,
//! panic-free, and well-documented code. Panics are disallowed in non-test
//! code to promote robust error handling.
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
//! # Meridian Kernel API
//!
//! Core traits for the collaborators the consensus engine talks to. The
//! consensus crate depends only on these interfaces; concrete storage,
//! script execution, and transport live behind them.

/// Traits for the blockchain store and script verification collaborators.
pub mod chain;
/// Traits for broadcasting consensus payloads to the committee.
pub mod network;

/// A curated set of the most commonly used traits and types.
pub mod prelude {
    pub use crate::chain::{BlockchainStore, ScriptVerifier, StateSnapshot};
    pub use crate::network::{GossipError, PayloadGossip};
}
