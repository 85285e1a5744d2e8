use serde::{Deserialize, Serialize};

/// A wallet allowed to manage a reward and to attest claims against it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimAuthority {
    pub address: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReward {
    pub reward_id: String,
    pub name: String,
    pub amount: u64,
    /// Additional authorities. The signer is always added as the first one.
    pub claim_authorities: Vec<ClaimAuthority>,
    pub deadline_block_height: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReward {
    /// Deterministic address minted when the reward was created.
    pub address: String,
    pub name: String,
    pub amount: u64,
    pub claim_authorities: Vec<ClaimAuthority>,
    pub deadline_block_height: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReward {
    pub address: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardMessage {
    Create(CreateReward),
    Update(UpdateReward),
    Delete(DeleteReward),
}
