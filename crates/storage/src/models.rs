//! Records read back from the state store.

use std::{fmt::Display, str::FromStr};

use alloy_primitives::{B256, Bytes};
use chorus_primitives::transaction::{ClaimAuthority, MessageControlType, NodeType};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    /// Consensus address of the proposer.
    pub proposer: String,
    pub chain_id: String,
    /// Unix seconds.
    pub created_at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    pub height: u64,
    pub app_hash: B256,
}

/// A finalized transaction as it appeared in its block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub tx_hash: String,
    pub block_height: u64,
    pub tx_index: u32,
    pub result_code: u32,
    pub transaction: Bytes,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// Checksummed delegate wallet.
    pub delegate_wallet: String,
    pub consensus_address: String,
    pub consensus_pubkey: Bytes,
    pub endpoint: String,
    pub node_type: NodeType,
    pub sp_id: String,
    pub eth_block: u64,
    pub voting_power: i64,
    /// Block height the validator was added at.
    pub registered_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Play {
    pub tx_hash: String,
    /// Position inside the transaction.
    pub play_index: u32,
    pub user_id: String,
    pub track_id: String,
    pub played_at: i64,
    pub signature: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub block_height: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub entity_id: i64,
    pub user_id: i64,
    /// Last action applied.
    pub action: String,
    pub metadata: String,
    pub signer: String,
    pub nonce: String,
    pub deleted: bool,
    pub tx_hash: String,
    pub block_height: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaRollupRecord {
    pub id: i64,
    pub tx_hash: String,
    pub block_start: u64,
    pub block_end: u64,
    /// Unix seconds.
    pub time: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaReport {
    pub rollup_id: i64,
    pub address: String,
    pub blocks_proposed: u64,
}

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = eyre::Report;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(eyre::eyre!(concat!("unknown ", stringify!($name), " `{}`"), other)),
                }
            }
        }
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeStatus {
    /// Waiting for proofs.
    Open,
    /// At least one proof was submitted.
    Proved,
    /// The verifier revealed the proof.
    Verified,
    /// No verification arrived in time.
    Faulted,
}

text_enum!(ChallengeStatus {
    Open => "open",
    Proved => "proved",
    Verified => "verified",
    Faulted => "faulted",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeOutcome {
    /// A majority of proofs matched the reveal.
    Positive,
    Negative,
}

text_enum!(ChallengeOutcome {
    Positive => "positive",
    Negative => "negative",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProofStatus {
    Pending,
    Pass,
    Fail,
    /// Not held against the prover because the challenge faulted.
    Exempt,
}

text_enum!(ProofStatus {
    Pending => "pending",
    Pass => "pass",
    Fail => "fail",
    Exempt => "exempt",
});

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub height: u64,
    pub block_hash: String,
    pub verifier_address: String,
    /// Fixed by the first proof submitted.
    pub prover_addresses: Option<Vec<String>>,
    pub status: ChallengeStatus,
    pub outcome: Option<ChallengeOutcome>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProof {
    pub height: u64,
    pub address: String,
    pub cid: String,
    pub proof_signature: Bytes,
    pub prover_addresses: Vec<String>,
    pub encrypted_proof: Bytes,
    pub encrypted_secret: Bytes,
    pub ephemeral_public_key: Bytes,
    pub status: ProofStatus,
}

/// Common columns of ERN, MEAD and PIE rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdexRecord {
    pub address: String,
    pub nonce: u64,
    pub tx_hash: String,
    pub message_index: u32,
    pub sender: String,
    pub control_type: MessageControlType,
    pub raw_message: Bytes,
    pub raw_acknowledgment: Bytes,
    pub block_height: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErnRecord {
    #[serde(flatten)]
    pub record: DdexRecord,
    pub party_addresses: Vec<String>,
    pub resource_addresses: Vec<String>,
    pub release_addresses: Vec<String>,
    pub deal_addresses: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeadRecord {
    #[serde(flatten)]
    pub record: DdexRecord,
    pub resource_addresses: Vec<String>,
    pub release_addresses: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieRecord {
    #[serde(flatten)]
    pub record: DdexRecord,
    pub party_addresses: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub address: String,
    pub reward_id: String,
    pub name: String,
    pub amount: u64,
    pub claim_authorities: Vec<ClaimAuthority>,
    pub deadline_block_height: u64,
    pub sender: String,
    pub tx_hash: String,
    pub block_height: u64,
}

impl Reward {
    pub fn is_authority(&self, wallet: &str) -> bool {
        self.claim_authorities
            .iter()
            .any(|authority| authority.address.eq_ignore_ascii_case(wallet))
    }
}
