//! Per-network constants.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// The network a node joins. Fixes the constants in [`NetworkParams`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Stage,
    Prod,
}

impl Environment {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Stage => "stage",
            Self::Prod => "prod",
        }
    }

    pub const fn params(&self) -> NetworkParams {
        match self {
            Self::Prod => NetworkParams {
                registry_address: "0xd976d3b4f4e22a238c1A736b6612D22f17b6f64C",
                eth_rpc_url: "https://eth-validator.audius.co",
                sla_rollup_interval: 2048,
                validator_voting_power: 10,
                attestation: AttestationParams::DEFAULT,
            },
            Self::Stage => NetworkParams {
                registry_address: "0xc682C2166E11690B64338e11633Cb8Bb60B0D9c0",
                eth_rpc_url: "https://eth-validator.staging.audius.co",
                sla_rollup_interval: 512,
                validator_voting_power: 10,
                attestation: AttestationParams::DEFAULT,
            },
            Self::Dev => NetworkParams {
                registry_address: "0xABbfF712977dB51f9f212B85e8A4904c818C2b63",
                eth_rpc_url: "http://eth-ganache:8545",
                sla_rollup_interval: 16,
                validator_voting_power: 25,
                attestation: AttestationParams::DEFAULT,
            },
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown environment `{0}`, expected one of dev, stage, prod")]
pub struct UnknownEnvironment(String);

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "stage" | "staging" => Ok(Self::Stage),
            "prod" | "production" => Ok(Self::Prod),
            _ => Err(UnknownEnvironment(s.to_string())),
        }
    }
}

/// Rendezvous sizes and quorums for membership attestations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationParams {
    /// Attestors selected for a registration.
    pub registration_rsize: usize,
    /// Signatures required for a registration.
    pub registration_min: usize,
    pub deregistration_rsize: usize,
    pub deregistration_min: usize,
}

impl AttestationParams {
    pub const DEFAULT: Self = Self {
        registration_rsize: 10,
        registration_min: 5,
        deregistration_rsize: 10,
        deregistration_min: 5,
    };
}

impl Default for AttestationParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkParams {
    /// Service provider registry contract.
    pub registry_address: &'static str,
    pub eth_rpc_url: &'static str,
    /// Blocks covered by one SLA rollup.
    pub sla_rollup_interval: u64,
    /// Voting power every registered validator gets.
    pub validator_voting_power: i64,
    pub attestation: AttestationParams,
}
