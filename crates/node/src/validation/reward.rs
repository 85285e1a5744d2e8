use alloy_primitives::Address;
use chorus_primitives::{
    AddressContext, AddressKind,
    transaction::{ClaimAuthority, RewardMessage},
    wallet_string,
};
use chorus_storage::{Queries, models::Reward};

use super::{BlockContext, ValidationError};

/// Name given to the creator when it did not list itself as an authority.
const CREATOR_AUTHORITY: &str = "creator";

pub(super) async fn validate(
    q: &mut Queries<'_>,
    ctx: &BlockContext,
    signer: &Address,
    message: &RewardMessage,
) -> Result<(), ValidationError> {
    match message {
        RewardMessage::Create(create) => {
            if create.reward_id.is_empty() {
                return Err(ValidationError::InvalidReward("id must not be empty"));
            }
            if create.name.is_empty() {
                return Err(ValidationError::InvalidReward("name must not be empty"));
            }
            ensure_deadline(create.deadline_block_height, ctx.height)
        }
        RewardMessage::Update(update) => {
            authorized_reward(q, signer, &update.address).await?;
            ensure_deadline(update.deadline_block_height, ctx.height)
        }
        RewardMessage::Delete(delete) => authorized_reward(q, signer, &delete.address)
            .await
            .map(drop),
    }
}

pub(super) async fn finalize(
    q: &mut Queries<'_>,
    addresses: &AddressContext<'_>,
    signer: &Address,
    message: &RewardMessage,
) -> eyre::Result<()> {
    let sender = wallet_string(signer);
    match message {
        RewardMessage::Create(create) => {
            let mut claim_authorities = create.claim_authorities.clone();
            if !claim_authorities
                .iter()
                .any(|authority| authority.address.eq_ignore_ascii_case(&sender))
            {
                claim_authorities.insert(
                    0,
                    ClaimAuthority {
                        address: sender.clone(),
                        name: CREATOR_AUTHORITY.to_string(),
                    },
                );
            }
            q.insert_reward(&Reward {
                address: addresses.address(AddressKind::Reward, &create.reward_id),
                reward_id: create.reward_id.clone(),
                name: create.name.clone(),
                amount: create.amount,
                claim_authorities,
                deadline_block_height: create.deadline_block_height,
                sender,
                tx_hash: addresses.tx_hash.to_string(),
                block_height: addresses.height,
            })
            .await
        }
        RewardMessage::Update(update) => {
            let Some(mut reward) = q.reward(&update.address).await? else {
                eyre::bail!("reward `{}` vanished", update.address);
            };
            reward.name = update.name.clone();
            reward.amount = update.amount;
            reward.claim_authorities = update.claim_authorities.clone();
            reward.deadline_block_height = update.deadline_block_height;
            reward.tx_hash = addresses.tx_hash.to_string();
            reward.block_height = addresses.height;
            q.update_reward(&reward).await
        }
        RewardMessage::Delete(delete) => q.delete_reward(&delete.address).await.map(drop),
    }
}

async fn authorized_reward(
    q: &mut Queries<'_>,
    signer: &Address,
    address: &str,
) -> Result<Reward, ValidationError> {
    let reward = q
        .reward(address)
        .await?
        .ok_or_else(|| ValidationError::UnknownAddress(address.to_string()))?;
    let wallet = wallet_string(signer);
    if !reward.is_authority(&wallet) {
        return Err(ValidationError::NotClaimAuthority(wallet));
    }
    Ok(reward)
}

fn ensure_deadline(deadline: u64, height: u64) -> Result<(), ValidationError> {
    if deadline < height {
        return Err(ValidationError::InvalidReward("deadline has passed"));
    }
    Ok(())
}
