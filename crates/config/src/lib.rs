//! Node configuration: the TOML file an operator writes plus the constants of
//! the network it selects.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

use std::{net::SocketAddr, path::Path};

use alloy_primitives::Address;
use chorus_primitives::{ConsensusKey, CryptoError, DelegateKey, transaction::NodeType};
use serde::{Deserialize, Serialize};

mod network;

pub use network::{AttestationParams, Environment, NetworkParams, UnknownEnvironment};

/// Default number of blocks kept before the engine may prune.
pub const DEFAULT_RETAIN_HEIGHT: u64 = 604_800;

/// Default mempool capacity in transactions.
pub const DEFAULT_MEMPOOL_MAX_TXS: usize = 30_000;

/// Default upper bound on a single transaction in bytes.
pub const DEFAULT_MEMPOOL_MAX_TX_BYTES: usize = 300 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed reading config file")]
    Read(#[source] std::io::Error),
    #[error("failed parsing config file")]
    Parse(#[source] toml::de::Error),
    #[error("chain id must not be empty")]
    EmptyChainId,
    #[error("invalid delegate private key")]
    DelegateKey(#[source] CryptoError),
    #[error("invalid consensus private key")]
    ConsensusKey(#[source] CryptoError),
    #[error("invalid genesis validator wallet `{0}`")]
    GenesisValidator(String),
    #[error("attestation quorum {min} exceeds rendezvous size {size}")]
    AttestationQuorum { min: usize, size: usize },
    #[error("mempool must hold at least one transaction")]
    EmptyMempool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    pub max_txs: usize,
    pub max_tx_bytes: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_txs: DEFAULT_MEMPOOL_MAX_TXS,
            max_tx_bytes: DEFAULT_MEMPOOL_MAX_TX_BYTES,
        }
    }
}

/// Operator supplied node settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,
    pub chain_id: String,
    /// SQLite connection string, e.g. `sqlite://chorus.db`.
    pub database_url: String,
    /// Address the client RPC server binds to.
    pub rpc_listen: SocketAddr,
    /// Public URL other validators reach this node at.
    pub external_endpoint: String,
    pub node_type: NodeType,
    /// Hex encoded secp256k1 key of the delegate wallet.
    pub delegate_private_key: String,
    /// Hex encoded 32 byte ed25519 seed of the consensus key.
    pub consensus_private_key: String,
    /// RPC endpoint of the registry service. Defaults to the network's eth RPC.
    pub registry_url: Option<String>,
    /// Keep every block. Disables retain height reporting.
    pub archive: bool,
    pub retain_height: u64,
    /// Wallets allowed to self-register.
    pub genesis_validators: Vec<String>,
    pub mempool: MempoolConfig,
    /// Overrides the network's attestation sizes.
    pub attestation: Option<AttestationParams>,
    /// Drive blocks with the built-in single validator loop.
    pub solo: bool,
    /// Milliseconds between blocks produced by the single validator loop.
    pub solo_block_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Dev,
            chain_id: "chorus-devnet".to_string(),
            database_url: "sqlite://chorus.db".to_string(),
            rpc_listen: SocketAddr::from(([127, 0, 0, 1], 26659)),
            external_endpoint: "http://127.0.0.1:26659".to_string(),
            node_type: NodeType::Content,
            delegate_private_key: String::new(),
            consensus_private_key: String::new(),
            registry_url: None,
            archive: false,
            retain_height: DEFAULT_RETAIN_HEIGHT,
            genesis_validators: Vec::new(),
            mempool: MempoolConfig::default(),
            attestation: None,
            solo: false,
            solo_block_interval_ms: 1_000,
        }
    }
}

impl Config {
    /// Reads and validates the config at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        let config: Self = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_id.trim().is_empty() {
            return Err(ConfigError::EmptyChainId);
        }
        self.delegate_key()?;
        self.consensus_key()?;
        for wallet in &self.genesis_validators {
            wallet
                .parse::<Address>()
                .map_err(|_| ConfigError::GenesisValidator(wallet.clone()))?;
        }
        let attestation = self.attestation();
        for (min, size) in [
            (attestation.registration_min, attestation.registration_rsize),
            (attestation.deregistration_min, attestation.deregistration_rsize),
        ] {
            if min > size {
                return Err(ConfigError::AttestationQuorum { min, size });
            }
        }
        if self.mempool.max_txs == 0 {
            return Err(ConfigError::EmptyMempool);
        }
        Ok(())
    }

    pub fn delegate_key(&self) -> Result<DelegateKey, ConfigError> {
        DelegateKey::from_hex(&self.delegate_private_key).map_err(ConfigError::DelegateKey)
    }

    pub fn consensus_key(&self) -> Result<ConsensusKey, ConfigError> {
        ConsensusKey::from_hex(&self.consensus_private_key).map_err(ConfigError::ConsensusKey)
    }

    /// Network constants with any configured overrides applied.
    pub fn network(&self) -> NetworkParams {
        let mut params = self.environment.params();
        params.attestation = self.attestation();
        params
    }

    pub fn attestation(&self) -> AttestationParams {
        self.attestation
            .unwrap_or(self.environment.params().attestation)
    }

    pub fn registry_url(&self) -> &str {
        self.registry_url
            .as_deref()
            .unwrap_or(self.environment.params().eth_rpc_url)
    }

    /// Whether `wallet` may bootstrap the validator set with a self-signed
    /// registration. Comparison ignores checksum casing.
    pub fn is_genesis_validator(&self, wallet: &str) -> bool {
        self.genesis_validators
            .iter()
            .any(|genesis| genesis.eq_ignore_ascii_case(wallet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const DELEGATE: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const CONSENSUS: &str = "0707070707070707070707070707070707070707070707070707070707070707";

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let file = write_config(&format!(
            r#"
environment = "stage"
chain_id = "chorus-stage"
delegate_private_key = "{DELEGATE}"
consensus_private_key = "{CONSENSUS}"
"#
        ));
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.environment, Environment::Stage);
        assert_eq!(config.retain_height, DEFAULT_RETAIN_HEIGHT);
        assert_eq!(config.mempool.max_txs, DEFAULT_MEMPOOL_MAX_TXS);
        assert_eq!(config.network().sla_rollup_interval, 512);
        assert_eq!(config.registry_url(), "https://eth-validator.staging.audius.co");
        assert!(!config.archive);
    }

    #[test]
    fn attestation_override_is_applied() {
        let file = write_config(&format!(
            r#"
chain_id = "chorus-devnet"
delegate_private_key = "{DELEGATE}"
consensus_private_key = "{CONSENSUS}"

[attestation]
registration_rsize = 3
registration_min = 3
deregistration_rsize = 3
deregistration_min = 2
"#
        ));
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.network().attestation.registration_rsize, 3);
        assert_eq!(config.network().validator_voting_power, 25);
    }

    #[test]
    fn rejects_quorum_above_rendezvous_size() {
        let config = Config {
            delegate_private_key: DELEGATE.into(),
            consensus_private_key: CONSENSUS.into(),
            attestation: Some(AttestationParams {
                registration_rsize: 2,
                registration_min: 3,
                ..AttestationParams::DEFAULT
            }),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AttestationQuorum { min: 3, size: 2 })
        ));
    }

    #[test]
    fn rejects_bad_keys_and_chain_id() {
        let config = Config {
            consensus_private_key: CONSENSUS.into(),
            delegate_private_key: "nope".into(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::DelegateKey(_))));

        let config = Config {
            chain_id: " ".into(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyChainId)));
    }

    #[test]
    fn unknown_environment_fails_to_parse() {
        let file = write_config("environment = \"mainnet\"\n");
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn genesis_validator_match_ignores_case() {
        let config = Config {
            genesis_validators: vec!["0x2c7536E3605D9C16a7a3D7b1898e529396a65c23".into()],
            ..Config::default()
        };
        assert!(config.is_genesis_validator("0x2c7536e3605d9c16a7a3d7b1898e529396a65c23"));
        assert!(!config.is_genesis_validator("0x0000000000000000000000000000000000000001"));
    }
}
