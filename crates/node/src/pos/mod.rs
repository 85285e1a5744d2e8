//! Proof-of-storage challenges.
//!
//! [`PosCoordinator::on_finalize`] runs inside block finalization, after the
//! block's transactions were applied. It opens a challenge when the block hash
//! triggers one, faults challenges whose verifier stayed silent and, when this
//! node is the verifier, reveals the proof the provers agree on. Talking to the
//! blob store and submitting transactions happens on detached tasks that never
//! touch the block's state transaction.

use std::{
    collections::{BTreeMap, HashSet},
    time::Duration,
};

use alloy_primitives::{B256, Bytes};
use chorus_primitives::{
    ConsensusKey, CryptoError, Transaction,
    crypto::verify_ed25519,
    rendezvous,
    transaction::{StorageProof, StorageProofVerification},
};
use chorus_storage::{
    Queries,
    models::{Challenge, ChallengeStatus, StoredProof, Validator},
};
use eyre::WrapErr;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    submit::{SubmitError, TxSubmitter},
    validation::{SUBMISSION_DEADLINE, VERIFICATION_DEADLINE},
};

mod seal;

pub use seal::{SECRET_LEN, SealedProof, open, seal};

/// How long the blob store gets to accept a request and to answer it.
pub const BLOB_STORE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum PosError {
    #[error("cipher failure: {0}")]
    Cipher(&'static str),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("blob store did not answer within {BLOB_STORE_TIMEOUT:?}")]
    Timeout,
    #[error("blob store channel closed")]
    BlobStoreClosed,
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Asks the blob store for a proof over the content selected by `hash`.
#[derive(Debug)]
pub struct PoSRequest {
    pub hash: B256,
    pub height: u64,
    pub reply: oneshot::Sender<PoSResponse>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoSResponse {
    pub cid: String,
    /// Consensus addresses of the nodes holding `cid`.
    pub replicas: Vec<String>,
    pub proof: Bytes,
}

/// Whether the block with `hash` opens a challenge.
pub fn is_challenge(hash: &B256) -> bool {
    hash[31] & 0x0f == 0
}

/// The validator that verifies the challenge opened by `hash`.
pub fn select_verifier<'a>(
    validators: impl IntoIterator<Item = &'a Validator>,
    hash: &B256,
) -> Option<String> {
    rendezvous::select(
        validators
            .into_iter()
            .map(|validator| validator.consensus_address.as_str()),
        hash.as_slice(),
        1,
    )
    .pop()
}

/// The plaintext most provers signed. Ties go to the smallest plaintext.
pub fn majority(plaintexts: impl IntoIterator<Item = Vec<u8>>) -> Option<Vec<u8>> {
    let mut counts = BTreeMap::<Vec<u8>, usize>::new();
    for plaintext in plaintexts {
        *counts.entry(plaintext).or_default() += 1;
    }
    counts
        .into_iter()
        .fold(None, |best, (plaintext, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((plaintext, count)),
        })
        .map(|(plaintext, _)| plaintext)
}

#[derive(Debug)]
pub struct PosCoordinator {
    key: ConsensusKey,
    address: String,
    submitter: TxSubmitter,
    blob_store: Option<mpsc::Sender<PoSRequest>>,
    /// Challenges this node already revealed a proof for.
    revealed: HashSet<u64>,
}

impl PosCoordinator {
    pub fn new(
        key: ConsensusKey,
        submitter: TxSubmitter,
        blob_store: Option<mpsc::Sender<PoSRequest>>,
    ) -> Self {
        Self {
            address: key.address(),
            key,
            submitter,
            blob_store,
            revealed: HashSet::new(),
        }
    }

    pub async fn on_finalize(&mut self, q: &mut Queries<'_>, height: u64, hash: &B256) -> eyre::Result<()> {
        if is_challenge(hash) {
            self.open_challenge(q, height, hash).await?;
        }

        for challenge in q.open_challenges().await.wrap_err("list open challenges")? {
            let age = height.saturating_sub(challenge.height);
            if age >= VERIFICATION_DEADLINE {
                let exempted = q.fault_challenge(challenge.height).await?;
                warn!(
                    height = challenge.height,
                    verifier = %challenge.verifier_address,
                    exempted,
                    "pos challenge faulted"
                );
            } else if age >= SUBMISSION_DEADLINE
                && challenge.verifier_address == self.address
                && !self.revealed.contains(&challenge.height)
            {
                self.reveal(q, &challenge).await?;
                self.revealed.insert(challenge.height);
            }
        }
        self.revealed
            .retain(|revealed| revealed + VERIFICATION_DEADLINE > height);
        Ok(())
    }

    async fn open_challenge(&self, q: &mut Queries<'_>, height: u64, hash: &B256) -> eyre::Result<()> {
        let validators = q.validators().await?;
        let Some(verifier_address) = select_verifier(&validators, hash) else {
            debug!(height, "no validators to verify pos challenge");
            return Ok(());
        };
        q.insert_challenge(&Challenge {
            height,
            block_hash: hash.to_string(),
            verifier_address: verifier_address.clone(),
            prover_addresses: None,
            status: ChallengeStatus::Open,
            outcome: None,
        })
        .await?;
        metrics::counter!("chorus_pos_challenges_total").increment(1);
        info!(height, verifier = %verifier_address, "pos challenge opened");

        let Some(blob_store) = self.blob_store.clone() else {
            return Ok(());
        };
        let Some(verifier) = validators
            .into_iter()
            .find(|validator| validator.consensus_address == verifier_address)
        else {
            return Ok(());
        };
        let prover = Prover {
            key: self.key.clone(),
            address: self.address.clone(),
            submitter: self.submitter.clone(),
            verifier_pubkey: verifier.consensus_pubkey,
        };
        let hash = *hash;
        tokio::spawn(async move {
            if let Err(err) = prover.prove(blob_store, hash, height).await {
                warn!(%err, height, "storage proof not submitted");
            }
        });
        Ok(())
    }

    /// Opens every proof filed for `challenge` and submits the plaintext most
    /// valid signatures agree on.
    async fn reveal(&self, q: &mut Queries<'_>, challenge: &Challenge) -> eyre::Result<()> {
        let hash: B256 = challenge
            .block_hash
            .parse()
            .wrap_err("parse challenge block hash")?;
        let proofs = q.storage_proofs(challenge.height).await?;
        let mut plaintexts = Vec::with_capacity(proofs.len());
        for proof in &proofs {
            let Some(prover) = q.validator_by_address(&proof.address).await? else {
                continue;
            };
            match open_proof(proof, &hash, &self.key) {
                Ok(plaintext)
                    if verify_ed25519(&prover.consensus_pubkey, &plaintext, &proof.proof_signature)
                        .is_ok() =>
                {
                    plaintexts.push(plaintext)
                }
                Ok(_) => debug!(prover = %proof.address, "proof does not match its signature"),
                Err(err) => debug!(%err, prover = %proof.address, "failed opening proof"),
            }
        }

        let Some(proof) = majority(plaintexts) else {
            info!(height = challenge.height, proofs = proofs.len(), "nothing to reveal for pos challenge");
            return Ok(());
        };
        let submitter = self.submitter.clone();
        let verification = Transaction::StorageProofVerification(StorageProofVerification {
            height: challenge.height,
            proof: proof.into(),
        });
        let height = challenge.height;
        tokio::spawn(async move {
            if let Err(err) = submitter.submit(verification).await {
                warn!(%err, height, "storage proof verification not submitted");
            }
        });
        Ok(())
    }
}

fn open_proof(proof: &StoredProof, hash: &B256, key: &ConsensusKey) -> Result<Vec<u8>, PosError> {
    open(
        &SealedProof {
            encrypted_proof: proof.encrypted_proof.clone(),
            encrypted_secret: proof.encrypted_secret.clone(),
            ephemeral_public_key: proof.ephemeral_public_key.clone(),
        },
        hash,
        key,
    )
}

struct Prover {
    key: ConsensusKey,
    address: String,
    submitter: TxSubmitter,
    verifier_pubkey: Bytes,
}

impl Prover {
    async fn prove(self, blob_store: mpsc::Sender<PoSRequest>, hash: B256, height: u64) -> Result<(), PosError> {
        let (reply, response) = oneshot::channel();
        tokio::time::timeout(
            BLOB_STORE_TIMEOUT,
            blob_store.send(PoSRequest {
                hash,
                height,
                reply,
            }),
        )
        .await
        .map_err(|_| PosError::Timeout)?
        .map_err(|_| PosError::BlobStoreClosed)?;
        let response = tokio::time::timeout(BLOB_STORE_TIMEOUT, response)
            .await
            .map_err(|_| PosError::Timeout)?
            .map_err(|_| PosError::BlobStoreClosed)?;

        if !response
            .replicas
            .iter()
            .any(|replica| replica.eq_ignore_ascii_case(&self.address))
        {
            debug!(height, cid = %response.cid, "not a replica of the challenged content");
            return Ok(());
        }

        let sealed = seal(&response.proof, &hash, &self.verifier_pubkey)?;
        let proof = StorageProof {
            height,
            cid: response.cid,
            address: self.address.clone(),
            proof_signature: self.key.sign(&response.proof),
            prover_addresses: response.replicas,
            encrypted_proof: sealed.encrypted_proof,
            encrypted_secret: sealed.encrypted_secret,
            ephemeral_public_key: sealed.ephemeral_public_key,
        };
        self.submitter
            .submit(Transaction::StorageProof(proof))
            .await?;
        info!(height, "storage proof submitted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chorus_primitives::{DelegateKey, transaction::NodeType, wallet_string};
    use sqlx::Acquire;
    use chorus_storage::StateStore;
    use chorus_transaction_pool::{Mempool, PoolConfig};
    use test_case::test_case;

    use super::*;
    use crate::{cache::Cache, peers::Peers};

    fn validator(address: &str) -> Validator {
        Validator {
            delegate_wallet: format!("0x{address}"),
            consensus_address: address.to_string(),
            consensus_pubkey: Bytes::new(),
            endpoint: format!("http://{address}"),
            node_type: NodeType::Content,
            sp_id: "1".into(),
            eth_block: 1,
            voting_power: 25,
            registered_at: 1,
        }
    }

    #[test_case(0x00, true)]
    #[test_case(0xc0, true)]
    #[test_case(0xc1, false)]
    #[test_case(0x0f, false)]
    fn challenge_trigger_uses_low_nibble(last: u8, expected: bool) {
        let mut hash = B256::repeat_byte(0xab);
        hash[31] = last;
        assert_eq!(is_challenge(&hash), expected);
    }

    #[test]
    fn verifier_is_the_top_ranked_validator() {
        let validators: Vec<_> = ["AA", "BB", "CC", "DD"].map(validator).into();
        let hash = B256::repeat_byte(0x10);
        let expected = rendezvous::rank(["AA", "BB", "CC", "DD"], hash.as_slice())[0].clone();

        assert_eq!(select_verifier(&validators, &hash), Some(expected));
        assert_eq!(select_verifier(&[], &hash), None);
    }

    #[test]
    fn majority_prefers_count_then_smallest() {
        assert_eq!(majority(Vec::<Vec<u8>>::new()), None);
        assert_eq!(
            majority([b"b".to_vec(), b"a".to_vec(), b"b".to_vec()]),
            Some(b"b".to_vec())
        );
        assert_eq!(majority([b"b".to_vec(), b"a".to_vec()]), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn replica_submits_a_sealed_proof() {
        let mempool = Arc::new(Mempool::new(PoolConfig::default(), Arc::new(Cache::new())));
        let delegate = DelegateKey::random();
        let prover_key = ConsensusKey::random();
        let verifier_key = ConsensusKey::random();
        let prover = Prover {
            address: prover_key.address(),
            key: prover_key.clone(),
            submitter: TxSubmitter::new(
                delegate.clone(),
                mempool.clone(),
                Peers::new(wallet_string(&delegate.address())),
            ),
            verifier_pubkey: Bytes::copy_from_slice(&verifier_key.public_key()),
        };

        let (blob_store, mut requests) = mpsc::channel::<PoSRequest>(1);
        let replicas = vec![prover_key.address(), "OTHER".to_string()];
        let responder = tokio::spawn({
            let replicas = replicas.clone();
            async move {
                let request = requests.recv().await.unwrap();
                assert_eq!(request.height, 16);
                request
                    .reply
                    .send(PoSResponse {
                        cid: "bafy".into(),
                        replicas,
                        proof: Bytes::from_static(b"digest"),
                    })
                    .unwrap();
            }
        });

        let hash = B256::repeat_byte(0x20);
        prover.prove(blob_store, hash, 16).await.unwrap();
        responder.await.unwrap();

        let pooled = mempool.get_batch(10, 0);
        assert_eq!(pooled.len(), 1);
        let Transaction::StorageProof(proof) = &pooled[0].transaction.transaction else {
            panic!("expected a storage proof");
        };
        assert_eq!(proof.prover_addresses, replicas);
        verify_ed25519(&prover_key.public_key(), b"digest", &proof.proof_signature).unwrap();
        let sealed = SealedProof {
            encrypted_proof: proof.encrypted_proof.clone(),
            encrypted_secret: proof.encrypted_secret.clone(),
            ephemeral_public_key: proof.ephemeral_public_key.clone(),
        };
        assert_eq!(open(&sealed, &hash, &verifier_key).unwrap(), b"digest");
    }

    #[tokio::test]
    async fn silent_blob_store_times_out() {
        let mempool = Arc::new(Mempool::new(PoolConfig::default(), Arc::new(Cache::new())));
        let delegate = DelegateKey::random();
        let key = ConsensusKey::random();
        let prover = Prover {
            address: key.address(),
            key,
            submitter: TxSubmitter::new(delegate, mempool.clone(), Peers::new(String::new())),
            verifier_pubkey: Bytes::new(),
        };
        let (blob_store, _requests) = mpsc::channel::<PoSRequest>(1);

        let err = prover.prove(blob_store, B256::ZERO, 16).await.unwrap_err();
        assert!(matches!(err, PosError::Timeout));
        assert!(mempool.is_empty());
    }

    #[tokio::test]
    async fn failed_reveal_is_retried_on_the_next_block() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::connect(&format!("sqlite://{}", dir.path().join("pos.db").display()))
            .await
            .unwrap();
        let key = ConsensusKey::random();
        let delegate = DelegateKey::random();
        let mempool = Arc::new(Mempool::new(PoolConfig::default(), Arc::new(Cache::new())));
        let mut coordinator = PosCoordinator::new(
            key.clone(),
            TxSubmitter::new(delegate, mempool, Peers::new(String::new())),
            None,
        );

        let mut block_tx = store.begin().await.unwrap();
        Queries::new(&mut block_tx)
            .insert_challenge(&Challenge {
                height: 10,
                block_hash: B256::repeat_byte(0x30).to_string(),
                verifier_address: key.address(),
                prover_addresses: None,
                status: ChallengeStatus::Open,
                outcome: None,
            })
            .await
            .unwrap();
        let quiet = B256::repeat_byte(0x11);
        assert!(!is_challenge(&quiet));

        let mut savepoint = block_tx.begin().await.unwrap();
        sqlx::query("DROP TABLE storage_proofs")
            .execute(&mut *savepoint)
            .await
            .unwrap();
        coordinator
            .on_finalize(&mut Queries::new(&mut savepoint), 12, &quiet)
            .await
            .unwrap_err();
        savepoint.rollback().await.unwrap();
        assert!(coordinator.revealed.is_empty());

        coordinator
            .on_finalize(&mut Queries::new(&mut block_tx), 13, &quiet)
            .await
            .unwrap();
        assert!(coordinator.revealed.contains(&10));
    }
}
