use std::time::Duration;

use alloy_primitives::{B256, Bytes};
use chorus_node::{
    abci::CODE_OK,
    pos::seal,
    validation::{SUBMISSION_DEADLINE, ValidationError},
};
use chorus_primitives::{
    Transaction,
    transaction::{StorageProof, TxKind},
};
use chorus_storage::{
    Queries,
    models::{ChallengeOutcome, ChallengeStatus, ProofStatus},
};

use crate::utils::{Identity, TestChain, challenge_hash, chain_with_validators};

const PROOF: &[u8] = b"sha256 of the challenged chunk";

fn storage_proof(prover: &Identity, provers: &[Identity], verifier: &Identity, hash: &B256, height: u64) -> Bytes {
    let sealed = seal(PROOF, hash, &verifier.pubkey()).unwrap();
    prover.sign(Transaction::StorageProof(StorageProof {
        height,
        cid: "bafkreichallenged".into(),
        address: prover.address(),
        proof_signature: prover.consensus.sign(PROOF),
        prover_addresses: provers.iter().map(Identity::address).collect(),
        encrypted_proof: sealed.encrypted_proof,
        encrypted_secret: sealed.encrypted_secret,
        ephemeral_public_key: sealed.ephemeral_public_key,
    }))
}

async fn wait_for_pool(chain: &TestChain, len: usize) {
    for _ in 0..100 {
        if chain.mempool.len() >= len {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("pool never reached {len} transactions");
}

async fn challenge_status(chain: &TestChain, height: u64) -> (ChallengeStatus, Option<ChallengeOutcome>) {
    let mut conn = chain.reader().await;
    let challenge = Queries::new(&mut conn)
        .challenge(height)
        .await
        .unwrap()
        .unwrap();
    (challenge.status, challenge.outcome)
}

#[tokio::test]
async fn challenge_resolves_positive() {
    let verifier = Identity::new(1);
    let provers: Vec<_> = (2..=4).map(Identity::new).collect();
    let validators: Vec<_> = std::iter::once(verifier.clone())
        .chain(provers.iter().cloned())
        .collect();
    let mut chain = chain_with_validators(&validators).await;

    let hash = challenge_hash(&chain.cache.validators(), &verifier.address());
    assert!(hash.to_string().ends_with("abc0"));
    let challenged = chain.produce_block_with_hash(hash).await.height;
    assert_eq!(challenge_status(&chain, challenged).await, (ChallengeStatus::Open, None));

    for prover in &provers {
        chain.insert(storage_proof(prover, &provers, &verifier, &hash, challenged));
    }
    let block = chain.produce_block().await;
    assert_eq!(block.tx_results.len(), 3);
    assert!(block.tx_results.iter().all(|result| result.code == CODE_OK));
    assert_eq!(challenge_status(&chain, challenged).await.0, ChallengeStatus::Proved);

    // The verifier reveals once the submission window closes.
    chain.produce_block().await;
    assert_eq!(chain.height(), challenged + 2);
    wait_for_pool(&chain, 1).await;

    let block = chain.produce_block().await;
    assert_eq!(block.tx_results.len(), 1);
    assert_eq!(block.tx_results[0].code, CODE_OK);
    let txs = chain.block_transactions(block.height).await;
    assert_eq!(txs[0].kind(), TxKind::StorageProofVerification);
    let Transaction::StorageProofVerification(verification) = &txs[0].transaction else {
        unreachable!()
    };
    assert_eq!(verification.proof.as_ref(), PROOF);

    assert_eq!(
        challenge_status(&chain, challenged).await,
        (ChallengeStatus::Verified, Some(ChallengeOutcome::Positive))
    );
    let mut conn = chain.reader().await;
    let proofs = Queries::new(&mut conn)
        .storage_proofs(challenged)
        .await
        .unwrap();
    assert_eq!(proofs.len(), 3);
    assert!(proofs.iter().all(|proof| proof.status == ProofStatus::Pass));
}

#[tokio::test]
async fn proof_two_blocks_after_the_challenge_is_on_time() {
    let verifier = Identity::new(1);
    let prover = Identity::new(2);
    let mut chain = chain_with_validators(&[verifier.clone(), prover.clone()]).await;

    let hash = challenge_hash(&chain.cache.validators(), &verifier.address());
    let challenged = chain.produce_block_with_hash(hash).await.height;
    chain.produce_block().await;

    let proof = storage_proof(&prover, &[prover.clone()], &verifier, &hash, challenged);
    chain.validate(&proof).await.unwrap();
    chain.insert(proof);
    let block = chain.produce_block().await;

    assert_eq!(block.height, challenged + SUBMISSION_DEADLINE);
    assert_eq!(block.tx_results.len(), 1);
    assert_eq!(block.tx_results[0].code, CODE_OK);
    assert_eq!(challenge_status(&chain, challenged).await.0, ChallengeStatus::Proved);

    // One block later the window is closed.
    let late = storage_proof(&verifier, &[prover.clone()], &verifier, &hash, challenged);
    let err = chain.validate(&late).await.unwrap_err();
    assert!(matches!(err, ValidationError::SubmissionDeadline { .. }), "{err}");
}

#[tokio::test]
async fn late_proof_is_not_proposed() {
    let verifier = Identity::new(1);
    let prover = Identity::new(2);
    let mut chain = chain_with_validators(&[verifier.clone(), prover.clone()]).await;

    let hash = challenge_hash(&chain.cache.validators(), &verifier.address());
    let challenged = chain.produce_block_with_hash(hash).await.height;
    chain.produce_blocks(2).await;

    chain.insert(storage_proof(&prover, &[prover.clone()], &verifier, &hash, challenged));
    let block = chain.produce_block().await;

    assert_eq!(block.height, challenged + 3);
    assert!(block.tx_results.is_empty());
    assert_eq!(challenge_status(&chain, challenged).await.0, ChallengeStatus::Open);
}

#[tokio::test]
async fn silent_verifier_faults_the_challenge() {
    let node = Identity::new(1);
    let verifier = Identity::new(2);
    let mut chain = chain_with_validators(&[node, verifier.clone()]).await;

    let hash = challenge_hash(&chain.cache.validators(), &verifier.address());
    let challenged = chain.produce_block_with_hash(hash).await.height;
    chain.produce_blocks(5).await;
    assert_eq!(challenge_status(&chain, challenged).await.0, ChallengeStatus::Open);

    chain.produce_block().await;
    assert_eq!(challenge_status(&chain, challenged).await.0, ChallengeStatus::Faulted);
}
