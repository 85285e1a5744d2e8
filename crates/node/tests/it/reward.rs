use alloy_primitives::Bytes;
use chorus_node::{abci::CODE_OK, validation::ValidationError};
use chorus_primitives::{
    AddressKind, entity_address,
    transaction::{
        ClaimAuthority, CreateReward, DeleteReward, RewardMessage, Transaction, UpdateReward,
    },
};
use chorus_storage::Queries;

use crate::utils::{CHAIN_ID, Identity, TestChain};

fn reward(identity: &Identity, message: RewardMessage) -> Bytes {
    identity.sign(Transaction::Reward(message))
}

fn update(address: &str, authorities: &[&Identity]) -> RewardMessage {
    RewardMessage::Update(UpdateReward {
        address: address.to_string(),
        name: "Launch week".into(),
        amount: 250,
        claim_authorities: authorities
            .iter()
            .map(|identity| ClaimAuthority {
                address: identity.wallet(),
                name: "curator".into(),
            })
            .collect(),
        deadline_block_height: 1_000,
    })
}

fn delete(address: &str) -> RewardMessage {
    RewardMessage::Delete(DeleteReward {
        address: address.to_string(),
    })
}

#[tokio::test]
async fn only_claim_authorities_manage_a_reward() {
    let owner = Identity::new(1);
    let stranger = Identity::new(7);
    let mut chain = TestChain::builder(owner.clone()).build().await;

    let hash = chain.insert(reward(
        &owner,
        RewardMessage::Create(CreateReward {
            reward_id: "launch".into(),
            name: "Launch".into(),
            amount: 100,
            claim_authorities: Vec::new(),
            deadline_block_height: 1_000,
        }),
    ));
    let block = chain.produce_block().await;
    assert_eq!(block.tx_results[0].code, CODE_OK);
    let address = entity_address(
        CHAIN_ID,
        block.height,
        &hash.to_string(),
        AddressKind::Reward,
        "launch",
    );

    for message in [update(&address, &[&stranger]), delete(&address)] {
        let err = chain
            .validate(&reward(&stranger, message))
            .await
            .unwrap_err();
        assert!(
            matches!(err, ValidationError::NotClaimAuthority(ref wallet) if *wallet == stranger.wallet()),
            "{err}"
        );
    }
    let err = chain
        .validate(&reward(&owner, delete("0xmissing")))
        .await
        .unwrap_err();
    assert!(matches!(err, ValidationError::UnknownAddress(_)), "{err}");

    // The owner hands the reward over to the stranger.
    chain.insert(reward(&owner, update(&address, &[&stranger])));
    let block = chain.produce_block().await;
    assert_eq!(block.tx_results[0].code, CODE_OK);
    {
        let mut conn = chain.reader().await;
        let stored = Queries::new(&mut conn)
            .reward(&address)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.amount, 250);
        assert!(stored.is_authority(&stranger.wallet()));
        assert!(!stored.is_authority(&owner.wallet()));
    }

    let err = chain
        .validate(&reward(&owner, delete(&address)))
        .await
        .unwrap_err();
    assert!(matches!(err, ValidationError::NotClaimAuthority(_)), "{err}");

    chain.insert(reward(&stranger, delete(&address)));
    let block = chain.produce_block().await;
    assert_eq!(block.tx_results[0].code, CODE_OK);
    let mut conn = chain.reader().await;
    assert!(
        Queries::new(&mut conn)
            .reward(&address)
            .await
            .unwrap()
            .is_none()
    );
}
