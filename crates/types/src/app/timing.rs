// Path: crates/types/src/app/timing.rs
//! Deterministic view-timeout arithmetic.
//!
//! This is a pure function and the single source of truth for both primaries
//! and backups: every node must arm the same timeout for the same view, or
//! view changes drift apart under load.

/// Computes the round timeout for a view, in milliseconds.
///
/// Exponential backoff: `base_ms * 2^view`. Repeated view changes
/// progressively slow the retry rate, bounding wasted work under sustained
/// faults. Saturates at `u64::MAX` for views beyond any practical reach.
pub fn timeout_for_view(view_number: u8, base_ms: u64) -> u64 {
    match 1u64.checked_shl(u32::from(view_number)) {
        Some(factor) => base_ms.saturating_mul(factor),
        None => u64::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_view() {
        assert_eq!(timeout_for_view(0, 15_000), 15_000);
        assert_eq!(timeout_for_view(1, 15_000), 30_000);
        assert_eq!(timeout_for_view(2, 15_000), 60_000);
        assert_eq!(timeout_for_view(5, 1_000), 32_000);
    }

    #[test]
    fn backoff_strictly_increases() {
        let base = 1_000;
        for v in 0u8..20 {
            assert!(timeout_for_view(v + 1, base) > timeout_for_view(v, base));
        }
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        assert_eq!(timeout_for_view(64, 1_000), u64::MAX);
        assert_eq!(timeout_for_view(63, u64::MAX), u64::MAX);
    }
}
