// Path: crates/types/src/config.rs
//! Shared configuration structures consumed by the node and consensus crates.
//!
//! These live in `meridian-types` to avoid a circular dependency between the
//! node crate (which reads them from disk) and the consensus crate (which
//! uses them to drive timing and candidate assembly).

use crate::error::ConfigError;
use crate::MAX_TRANSACTIONS_PER_BLOCK;
use serde::{Deserialize, Serialize};

/// Parameters governing a consensus round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsensusConfig {
    /// The base block time: the view-0 timeout and the target block interval.
    pub milliseconds_per_block: u64,
    /// The maximum number of transactions the primary packs into a candidate.
    /// Must not exceed the protocol ceiling.
    pub max_transactions_per_block: usize,
    /// When true, the node runs a self-contained committee for development
    /// instead of joining an external network.
    pub private_net: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            milliseconds_per_block: 15_000,
            max_transactions_per_block: MAX_TRANSACTIONS_PER_BLOCK,
            private_net: false,
        }
    }
}

impl ConsensusConfig {
    /// Rejects configurations consensus cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.milliseconds_per_block == 0 {
            return Err(ConfigError::InvalidBlockTime);
        }
        if self.max_transactions_per_block == 0
            || self.max_transactions_per_block > MAX_TRANSACTIONS_PER_BLOCK
        {
            return Err(ConfigError::InvalidTransactionCap(
                self.max_transactions_per_block,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ConsensusConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_block_time_is_rejected() {
        let cfg = ConsensusConfig {
            milliseconds_per_block: 0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidBlockTime)
        ));
    }

    #[test]
    fn transaction_cap_is_bounded_by_protocol_maximum() {
        let cfg = ConsensusConfig {
            max_transactions_per_block: MAX_TRANSACTIONS_PER_BLOCK + 1,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidTransactionCap(_))
        ));
    }

    #[test]
    fn config_parses_from_toml() {
        let cfg: ConsensusConfig = toml::from_str(
            r#"
            milliseconds_per_block = 1000
            max_transactions_per_block = 64
            private_net = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.milliseconds_per_block, 1_000);
        assert!(cfg.private_net);
        cfg.validate().unwrap();
    }
}
