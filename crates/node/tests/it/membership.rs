use chorus_node::{
    abci::{
        Application, CODE_OK, Misbehavior, MisbehaviorKind, ProcessProposalRequest, ProposalStatus,
    },
    events::{DEREGISTRATION_TOPIC, Event},
};
use chorus_primitives::{
    Transaction, consensus_address, rendezvous,
    transaction::{Attestation, AttestationBody, NodeType, TxKind, ValidatorRegistration},
};
use chorus_storage::{Queries, models::ChallengeStatus};

use crate::utils::{Identity, POWER, TestChain, challenge_hash, chain_with_validators};

#[tokio::test]
async fn genesis_node_registers_itself() {
    let node = Identity::new(0xaa);
    let mut chain = TestChain::builder(node.clone()).build().await;

    chain.insert(node.sign(node.legacy_registration(100)));
    let block = chain.produce_block().await;

    assert_eq!(block.tx_results.len(), 1);
    assert_eq!(block.tx_results[0].code, CODE_OK);
    assert_eq!(block.validator_updates.len(), 1);
    assert_eq!(block.validator_updates[0].pub_key, node.pubkey());
    assert_eq!(block.validator_updates[0].power, POWER);

    let mut conn = chain.reader().await;
    let validators = Queries::new(&mut conn).validators().await.unwrap();
    assert_eq!(validators.len(), 1);
    assert_eq!(validators[0].consensus_address, consensus_address(&node.pubkey()));
    assert_eq!(validators[0].delegate_wallet, node.wallet());
    assert_eq!(validators[0].eth_block, 100);
    assert_eq!(chain.cache.validators().len(), 1);
}

#[tokio::test]
async fn self_registration_closes_after_genesis() {
    let node = Identity::new(1);
    let late = Identity::new(2);
    let mut chain = TestChain::builder(node.clone()).genesis([&node]).build().await;
    chain.insert(node.sign(node.legacy_registration(1)));
    chain.produce_block().await;

    chain.insert(late.sign(late.legacy_registration(2)));
    let block = chain.produce_block().await;

    assert!(block.tx_results.is_empty());
    let mut conn = chain.reader().await;
    assert_eq!(Queries::new(&mut conn).validator_count().await.unwrap(), 1);
}

fn registration_body(candidate: &Identity, deadline: u64) -> ValidatorRegistration {
    ValidatorRegistration {
        consensus_address: candidate.address(),
        consensus_pubkey: candidate.pubkey(),
        delegate_wallet: candidate.wallet(),
        endpoint: candidate.endpoint(),
        node_type: NodeType::Content,
        sp_id: "42".into(),
        eth_block: 42,
        voting_power: POWER,
        deadline,
    }
}

#[tokio::test]
async fn attested_registration_joins_the_set() {
    let validators: Vec<_> = (1..=4).map(Identity::new).collect();
    let candidate = Identity::new(9);
    let mut chain = chain_with_validators(&validators).await;

    let wallets: Vec<_> = validators.iter().map(Identity::wallet).collect();
    let selected = rendezvous::select(&wallets, &rendezvous::registration_key(42), 3);
    assert_eq!(selected.len(), 3);

    let body = AttestationBody::ValidatorRegistration(registration_body(
        &candidate,
        chain.height() + 10,
    ));
    let message = body.signing_bytes().unwrap();
    let mut signatures: Vec<_> = validators
        .iter()
        .filter(|validator| selected.contains(&validator.wallet()))
        .map(|validator| validator.delegate.sign(&message).unwrap())
        .collect();
    signatures.push(candidate.delegate.sign(&message).unwrap());

    let hash = chain.insert(candidate.sign(Transaction::Attestation(Attestation {
        signatures,
        body,
    })));
    let block = chain.produce_block().await;

    assert_eq!(block.tx_results.len(), 1);
    assert_eq!(block.tx_results[0].code, CODE_OK);
    assert_eq!(block.validator_updates[0].pub_key, candidate.pubkey());
    let mut conn = chain.reader().await;
    let mut q = Queries::new(&mut conn);
    assert_eq!(q.validator_count().await.unwrap(), 5);
    assert!(q.validator_by_wallet(&candidate.wallet()).await.unwrap().is_some());
    assert_eq!(
        q.tx_stat_count(TxKind::AttestationRegistration.as_str())
            .await
            .unwrap(),
        1
    );
    assert!(q.transaction(&hash.to_string()).await.unwrap().is_some());
}

#[tokio::test]
async fn attestation_from_unselected_validators_is_rejected() {
    let validators: Vec<_> = (1..=4).map(Identity::new).collect();
    let candidate = Identity::new(9);
    let mut chain = chain_with_validators(&validators).await;

    let wallets: Vec<_> = validators.iter().map(Identity::wallet).collect();
    let selected = rendezvous::select(&wallets, &rendezvous::registration_key(42), 3);
    let body = AttestationBody::ValidatorRegistration(registration_body(
        &candidate,
        chain.height() + 10,
    ));
    let message = body.signing_bytes().unwrap();
    // One selected attestor plus the validator rendezvous left out.
    let signatures = validators
        .iter()
        .filter(|validator| !selected.contains(&validator.wallet()))
        .chain(
            validators
                .iter()
                .filter(|validator| selected.contains(&validator.wallet()))
                .take(1),
        )
        .map(|validator| validator.delegate.sign(&message).unwrap())
        .collect();
    let tx = candidate.sign(Transaction::Attestation(Attestation { signatures, body }));

    let height = chain.height() + 1;
    let time = chain.next_time();
    let response = chain
        .driver
        .app_mut()
        .process_proposal(ProcessProposalRequest {
            txs: vec![tx],
            misbehavior: Vec::new(),
            hash: Default::default(),
            height,
            time,
            proposer_address: validators[0].address(),
        })
        .await
        .unwrap();
    assert_eq!(response.status, ProposalStatus::Reject);
}

#[tokio::test]
async fn misbehaving_validator_is_removed() {
    let node = Identity::new(1);
    let misbehaving = Identity::new(2);
    let mut chain = chain_with_validators(&[node.clone(), misbehaving.clone()]).await;
    let mut deregistrations = chain.events.subscribe(DEREGISTRATION_TOPIC);

    // Open a challenge the misbehaving validator is supposed to verify.
    let validators = chain.cache.validators();
    let hash = challenge_hash(&validators, &misbehaving.address());
    let challenged = chain.produce_block_with_hash(hash).await.height;

    chain.driver.report_misbehavior(Misbehavior {
        kind: MisbehaviorKind::DuplicateVote,
        validator_address: misbehaving.address(),
        height: challenged,
    });
    let block = chain.produce_block().await;

    assert_eq!(block.tx_results.len(), 1);
    assert_eq!(block.tx_results[0].code, CODE_OK);
    assert_eq!(block.validator_updates.len(), 1);
    assert_eq!(block.validator_updates[0].pub_key, misbehaving.pubkey());
    assert_eq!(block.validator_updates[0].power, 0);

    let txs = chain.block_transactions(block.height).await;
    let Transaction::ValidatorDeregistration(deregistration) = &txs[0].transaction else {
        panic!("expected a misbehavior deregistration, got {:?}", txs[0].kind());
    };
    assert_eq!(deregistration.consensus_address, misbehaving.address());
    assert_eq!(
        consensus_address(&deregistration.consensus_pubkey),
        misbehaving.address()
    );

    let mut conn = chain.reader().await;
    let mut q = Queries::new(&mut conn);
    assert_eq!(q.validator_count().await.unwrap(), 1);
    assert!(
        q.validator_by_address(&misbehaving.address())
            .await
            .unwrap()
            .is_none()
    );
    let challenge = q.challenge(challenged).await.unwrap().unwrap();
    assert_eq!(challenge.status, ChallengeStatus::Faulted);

    match deregistrations.try_recv().unwrap() {
        Event::Deregistration {
            consensus_address, ..
        } => assert_eq!(consensus_address, misbehaving.address()),
        other => panic!("unexpected event {other:?}"),
    }
}
