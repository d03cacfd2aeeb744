// Path: crates/node/src/config.rs
//! On-disk configuration for the node binary.

use meridian_types::config::ConsensusConfig;
use meridian_types::error::ConfigError;
use serde::Deserialize;
use std::path::Path;

/// The TOML file format read at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Consensus round parameters.
    #[serde(default)]
    pub consensus: ConsensusConfig,
    /// Hex-encoded 32-byte Ed25519 secret for this validator. Omitted on a
    /// private net, where the committee is generated locally.
    #[serde(default)]
    pub validator_secret: Option<String>,
    /// Native-asset balance granted to each generated private-net account.
    #[serde(default = "default_genesis_balance")]
    pub genesis_balance: u64,
}

fn default_genesis_balance() -> u64 {
    1_000_000_000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            consensus: ConsensusConfig::default(),
            validator_secret: None,
            genesis_balance: default_genesis_balance(),
        }
    }
}

impl NodeConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.consensus.validate()?;
        Ok(config)
    }

    /// Decodes the configured validator secret, if present.
    pub fn validator_secret_bytes(&self) -> Result<Option<[u8; 32]>, ConfigError> {
        let Some(encoded) = self.validator_secret.as_deref() else {
            return Ok(None);
        };
        let bytes = hex::decode(encoded)
            .map_err(|e| ConfigError::Load(format!("validator_secret: {e}")))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ConfigError::Load("validator_secret must be 32 bytes".into()))?;
        Ok(Some(secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_private_net_config() {
        let config: NodeConfig = toml::from_str(
            r#"
            [consensus]
            milliseconds_per_block = 1000
            max_transactions_per_block = 64
            private_net = true
            "#,
        )
        .unwrap();
        assert!(config.consensus.private_net);
        assert!(config.validator_secret_bytes().unwrap().is_none());
        assert_eq!(config.genesis_balance, 1_000_000_000);
    }

    #[test]
    fn rejects_malformed_secret() {
        let config = NodeConfig {
            validator_secret: Some("zz".into()),
            ..Default::default()
        };
        assert!(config.validator_secret_bytes().is_err());
    }
}
