use alloy_primitives::Bytes;
use serde::{Deserialize, Serialize};

use super::{CodecError, encode};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Content,
    Discovery,
}

impl NodeType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Discovery => "discovery",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "content" | "content-node" => Ok(Self::Content),
            "discovery" | "discovery-node" => Ok(Self::Discovery),
            other => Err(format!("unknown node type `{other}`")),
        }
    }
}

/// Self-signed registration, only accepted while bootstrapping a network.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRegistrationLegacy {
    pub endpoint: String,
    pub consensus_address: String,
    /// ed25519 public key.
    pub consensus_pubkey: Bytes,
    /// Checksummed delegate wallet.
    pub delegate_wallet: String,
    pub node_type: NodeType,
    pub sp_id: String,
    pub eth_block: u64,
    pub power: i64,
}

/// Deregistration proposed for a validator the consensus engine reported as
/// misbehaving.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorMisbehaviorDeregistration {
    pub consensus_address: String,
    pub consensus_pubkey: Bytes,
}

/// Body of an attested registration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRegistration {
    pub consensus_address: String,
    pub consensus_pubkey: Bytes,
    pub delegate_wallet: String,
    pub endpoint: String,
    pub node_type: NodeType,
    pub sp_id: String,
    /// Ethereum block the node registered at. Seeds attestor selection.
    pub eth_block: u64,
    pub voting_power: i64,
    /// Last block height at which the attestation may be finalized.
    pub deadline: u64,
}

/// Body of an attested deregistration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorDeregistration {
    pub consensus_address: String,
    /// Seeds attestor selection.
    pub consensus_pubkey: Bytes,
    pub deadline: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttestationBody {
    ValidatorRegistration(ValidatorRegistration),
    ValidatorDeregistration(ValidatorDeregistration),
}

impl AttestationBody {
    /// The bytes every attestor signs.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }

    pub fn deadline(&self) -> u64 {
        match self {
            Self::ValidatorRegistration(body) => body.deadline,
            Self::ValidatorDeregistration(body) => body.deadline,
        }
    }
}

/// A membership change carrying signatures from rendezvous selected attestors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub signatures: Vec<Bytes>,
    pub body: AttestationBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_parses_aliases() {
        assert_eq!("Content".parse::<NodeType>().unwrap(), NodeType::Content);
        assert_eq!("discovery-node".parse::<NodeType>().unwrap(), NodeType::Discovery);
        assert!("validator".parse::<NodeType>().is_err());
    }
}
