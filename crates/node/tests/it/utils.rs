use std::{path::Path, sync::Arc};

use alloy_primitives::{B256, Bytes, TxHash};
use chorus_config::{AttestationParams, Config};
use chorus_node::{
    CoreApp,
    cache::Cache,
    events::EventBus,
    peers::Peers,
    pos::PosCoordinator,
    solo::{ProducedBlock, SoloDriver},
    submit::TxSubmitter,
    validation::{BlockContext, Phase, TxValidator, ValidationError},
};
use chorus_primitives::{
    ConsensusKey, DelegateKey, SignedTransaction, Transaction, wallet_string,
    transaction::{NodeType, ValidatorRegistrationLegacy},
};
use chorus_storage::{Queries, StateStore};
use chorus_transaction_pool::{InsertOutcome, Mempool, PoolConfig};
use sqlx::{Sqlite, pool::PoolConnection};
use tempfile::TempDir;

pub(crate) const CHAIN_ID: &str = "chorus-test";

/// Dev network voting power.
pub(crate) const POWER: i64 = 25;

const GENESIS_TIME: i64 = 1_700_000_000;

/// Keys of one validator, derived from a small index.
#[derive(Clone, Debug)]
pub(crate) struct Identity {
    pub(crate) delegate: DelegateKey,
    pub(crate) consensus: ConsensusKey,
    delegate_hex: String,
    consensus_hex: String,
}

impl Identity {
    pub(crate) fn new(index: u8) -> Self {
        let delegate_hex = format!("0x{:064x}", u64::from(index) + 1);
        let consensus_hex = format!("{:02x}", index.wrapping_add(1)).repeat(32);
        Self {
            delegate: DelegateKey::from_hex(&delegate_hex).unwrap(),
            consensus: ConsensusKey::from_hex(&consensus_hex).unwrap(),
            delegate_hex,
            consensus_hex,
        }
    }

    pub(crate) fn wallet(&self) -> String {
        wallet_string(&self.delegate.address())
    }

    /// Consensus address.
    pub(crate) fn address(&self) -> String {
        self.consensus.address()
    }

    pub(crate) fn pubkey(&self) -> Bytes {
        Bytes::copy_from_slice(&self.consensus.public_key())
    }

    pub(crate) fn endpoint(&self) -> String {
        format!("https://{}.chorus.test", self.address().to_lowercase())
    }

    pub(crate) fn legacy_registration(&self, eth_block: u64) -> Transaction {
        Transaction::ValidatorRegistration(ValidatorRegistrationLegacy {
            endpoint: self.endpoint(),
            consensus_address: self.address(),
            consensus_pubkey: self.pubkey(),
            delegate_wallet: self.wallet(),
            node_type: NodeType::Content,
            sp_id: "1".into(),
            eth_block,
            power: POWER,
        })
    }

    /// Node settings for this identity with its database under `dir`.
    pub(crate) fn config(&self, dir: &Path) -> Config {
        Config {
            chain_id: CHAIN_ID.to_string(),
            database_url: format!("sqlite://{}", dir.join("chorus.db").display()),
            external_endpoint: self.endpoint(),
            delegate_private_key: self.delegate_hex.clone(),
            consensus_private_key: self.consensus_hex.clone(),
            ..Default::default()
        }
    }

    /// Signs `transaction` under a fresh request id.
    pub(crate) fn sign(&self, transaction: Transaction) -> Bytes {
        SignedTransaction::new(uuid::Uuid::new_v4().to_string(), transaction)
            .sign(&self.delegate)
            .unwrap()
            .encode()
            .unwrap()
            .into()
    }
}

#[derive(Debug)]
pub(crate) struct TestChainBuilder {
    node: Identity,
    genesis: Vec<String>,
    attestation: Option<AttestationParams>,
}

impl TestChainBuilder {
    /// Wallets allowed to self-register.
    pub(crate) fn genesis<'a>(mut self, identities: impl IntoIterator<Item = &'a Identity>) -> Self {
        self.genesis = identities.into_iter().map(Identity::wallet).collect();
        self
    }

    pub(crate) fn attestation(mut self, params: AttestationParams) -> Self {
        self.attestation = Some(params);
        self
    }

    pub(crate) async fn build(self) -> TestChain {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            genesis_validators: self.genesis,
            attestation: self.attestation,
            solo: true,
            ..self.node.config(dir.path())
        };
        config.validate().unwrap();

        let validator = TxValidator::from_config(&config);
        let store = StateStore::connect(&config.database_url).await.unwrap();
        let cache = Cache::new();
        let mempool = Arc::new(Mempool::new(PoolConfig::default(), Arc::new(cache.clone())));
        let events = EventBus::new();
        let submitter = TxSubmitter::new(
            self.node.delegate.clone(),
            mempool.clone(),
            Peers::new(self.node.wallet()),
        );
        let pos = PosCoordinator::new(self.node.consensus.clone(), submitter.clone(), None);
        let app = CoreApp::new(
            &config,
            self.node.delegate.clone(),
            store.clone(),
            mempool.clone(),
            cache.clone(),
            events.clone(),
            pos,
        );
        let mut driver = SoloDriver::new(
            app,
            self.node.address(),
            std::time::Duration::from_millis(100),
        );
        driver.start(CHAIN_ID, Vec::new()).await.unwrap();
        cache.set_ready(true);

        TestChain {
            _dir: dir,
            node: self.node,
            store,
            cache,
            mempool,
            events,
            submitter,
            driver,
            validator,
            time: GENESIS_TIME,
        }
    }
}

/// A single validator chain on a temporary database, driven block by block.
#[derive(Debug)]
pub(crate) struct TestChain {
    _dir: TempDir,
    pub(crate) node: Identity,
    pub(crate) store: StateStore,
    pub(crate) cache: Cache,
    pub(crate) mempool: Arc<Mempool>,
    pub(crate) events: EventBus,
    pub(crate) submitter: TxSubmitter,
    pub(crate) driver: SoloDriver<CoreApp>,
    validator: TxValidator,
    time: i64,
}

impl TestChain {
    pub(crate) fn builder(node: Identity) -> TestChainBuilder {
        TestChainBuilder {
            node,
            genesis: Vec::new(),
            attestation: None,
        }
    }

    pub(crate) fn height(&self) -> u64 {
        self.driver.height()
    }

    /// Proposal time of the next block.
    pub(crate) fn next_time(&mut self) -> i64 {
        self.time += 1;
        self.time
    }

    pub(crate) async fn produce_block(&mut self) -> ProducedBlock {
        let time = self.next_time();
        self.driver.produce_block_at(time).await.unwrap()
    }

    pub(crate) async fn produce_blocks(&mut self, count: u64) {
        for _ in 0..count {
            self.produce_block().await;
        }
    }

    pub(crate) async fn produce_block_with_hash(&mut self, hash: B256) -> ProducedBlock {
        let time = self.next_time();
        self.driver
            .produce_block_with_hash(time, hash)
            .await
            .unwrap()
    }

    /// Adds signed bytes to the pool, which must accept them.
    pub(crate) fn insert(&self, tx: Bytes) -> TxHash {
        match self.mempool.insert(tx) {
            InsertOutcome::Accepted(hash) => hash,
            other => panic!("transaction not accepted: {other:?}"),
        }
    }

    /// Checks signed bytes as a proposal for the next block would.
    pub(crate) async fn validate(&self, tx: &Bytes) -> Result<(), ValidationError> {
        let tx = SignedTransaction::decode(tx).unwrap();
        let ctx = BlockContext {
            height: self.height() + 1,
            time: self.time + 1,
            hash: B256::ZERO,
            proposer: self.node.address(),
            misbehavior: Vec::new(),
            phase: Phase::Proposal,
        };
        let mut conn = self.reader().await;
        self.validator
            .validate(&mut Queries::new(&mut conn), &ctx, &tx)
            .await
            .map(drop)
    }

    pub(crate) async fn reader(&self) -> PoolConnection<Sqlite> {
        self.store.reader().await.unwrap()
    }

    /// Decoded transactions of the block at `height`, in block order.
    pub(crate) async fn block_transactions(&self, height: u64) -> Vec<SignedTransaction> {
        let mut conn = self.reader().await;
        Queries::new(&mut conn)
            .block_transactions(height)
            .await
            .unwrap()
            .into_iter()
            .map(|stored| SignedTransaction::decode(&stored.transaction).unwrap())
            .collect()
    }
}

/// A block hash that opens a storage challenge verified by `verifier`.
///
/// The hash ends in `…abc0` and only its first bytes vary between attempts.
pub(crate) fn challenge_hash(validators: &[chorus_storage::models::Validator], verifier: &str) -> B256 {
    (0..=u16::MAX)
        .map(|attempt| {
            let mut hash = B256::repeat_byte(0x5a);
            hash[..2].copy_from_slice(&attempt.to_be_bytes());
            hash[30] = 0xab;
            hash[31] = 0xc0;
            hash
        })
        .find(|hash| chorus_node::pos::select_verifier(validators, hash).as_deref() == Some(verifier))
        .expect("some hash selects the verifier")
}

/// A chain whose first block registers every one of `validators`, the
/// first being the local node. Attestations need three of three selected.
pub(crate) async fn chain_with_validators(validators: &[Identity]) -> TestChain {
    let mut chain = TestChain::builder(validators[0].clone())
        .genesis(validators)
        .attestation(AttestationParams {
            registration_rsize: 3,
            registration_min: 3,
            deregistration_rsize: 3,
            deregistration_min: 3,
        })
        .build()
        .await;
    for (eth_block, validator) in validators.iter().enumerate() {
        chain.insert(validator.sign(validator.legacy_registration(eth_block as u64 + 1)));
    }
    let block = chain.produce_block().await;
    assert!(block.tx_results.iter().all(|result| result.code == 0));
    chain
}
