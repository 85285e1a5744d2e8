//! The replicated state machine behind the consensus engine.
//!
//! Block processing is owned by a single [`CoreApp`]. `finalize_block` opens
//! one state store transaction for the block and applies every transaction in
//! its own savepoint; `commit` commits the block transaction and only then
//! announces the results.

use std::{collections::BTreeSet, sync::Arc};

use alloy_primitives::{B256, Bytes};
use chorus_config::Config;
use chorus_primitives::{
    DelegateKey, SignedTransaction, Transaction, TxHash,
    transaction::{ValidatorMisbehaviorDeregistration, tx_hash},
};
use chorus_storage::{
    Queries, StateStore,
    models::{Block, StoredTransaction},
};
use chorus_transaction_pool::Mempool;
use eyre::{OptionExt as _, WrapErr, bail};
use sha2::{Digest, Sha256};
use sqlx::{Connection as _, Sqlite};
use tracing::{debug, error, info, warn};

use crate::{
    abci::{
        Application, CODE_FINALIZE_FAILED, CODE_OK, CODE_REJECTED, CODE_UNPARSABLE,
        CheckTxResponse, CommitResponse, ExecTxResult, FinalizeBlockRequest,
        FinalizeBlockResponse, InfoResponse, InitChainRequest, InitChainResponse, Misbehavior,
        PrepareProposalRequest, PrepareProposalResponse, ProcessProposalRequest,
        ProcessProposalResponse, ProposalStatus,
    },
    cache::Cache,
    events::{Event, EventBus, tx_finalized_topic},
    pos::PosCoordinator,
    validation::{
        BlockContext, BlockEffects, Phase, TxValidator, ValidationError, expected_rollup,
        ordering::{priority, sort_by_priority},
    },
};

/// Most transactions a proposal carries.
pub const MAX_BLOCK_TXS: usize = 1000;

/// Finalized blocks between sweeps of expired mempool entries.
pub const MEMPOOL_SWEEP_INTERVAL: u64 = 100;

/// Decodes `bytes`, accepting only the canonical encoding.
pub fn decode_canonical(bytes: &[u8]) -> Option<SignedTransaction> {
    let tx = SignedTransaction::decode(bytes).ok()?;
    match tx.encode() {
        Ok(encoded) if encoded == bytes => Some(tx),
        _ => None,
    }
}

/// `sha256(previous ‖ tx_0 ‖ … ‖ tx_n)`.
pub fn next_app_hash<'a>(previous: &B256, txs: impl IntoIterator<Item = &'a Bytes>) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update(previous);
    for tx in txs {
        hasher.update(tx);
    }
    B256::from_slice(&hasher.finalize())
}

/// Retain height to report after committing `latest`, if pruning advances.
pub fn next_retain_height(latest: u64, retain_height: u64, last_retain_height: u64) -> Option<u64> {
    (latest.saturating_sub(retain_height) > last_retain_height).then_some(latest)
}

/// A finalized block waiting for `commit`.
struct PendingBlock {
    tx: sqlx::Transaction<'static, Sqlite>,
    height: u64,
    app_hash: B256,
    tx_hashes: Vec<TxHash>,
    results: Vec<(String, u32)>,
    effects: BlockEffects,
    retain_height: Option<u64>,
}

impl std::fmt::Debug for PendingBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingBlock")
            .field("height", &self.height)
            .field("app_hash", &self.app_hash)
            .field("txs", &self.tx_hashes.len())
            .finish_non_exhaustive()
    }
}

/// Implements [`Application`] over the state store, the mempool and the
/// proof-of-storage coordinator.
#[derive(Debug)]
pub struct CoreApp {
    chain_id: String,
    key: DelegateKey,
    store: StateStore,
    validator: TxValidator,
    mempool: Arc<Mempool>,
    cache: Cache,
    events: EventBus,
    pos: PosCoordinator,
    archive: bool,
    retain_height: u64,
    last_retain_height: u64,
    height: u64,
    app_hash: B256,
    block: Option<PendingBlock>,
}

impl CoreApp {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        key: DelegateKey,
        store: StateStore,
        mempool: Arc<Mempool>,
        cache: Cache,
        events: EventBus,
        pos: PosCoordinator,
    ) -> Self {
        Self {
            chain_id: config.chain_id.clone(),
            key,
            store,
            validator: TxValidator::from_config(config),
            mempool,
            cache,
            events,
            pos,
            archive: config.archive,
            retain_height: config.retain_height,
            last_retain_height: config.retain_height,
            height: 0,
            app_hash: B256::ZERO,
            block: None,
        }
    }

    /// Height of the last committed block.
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn app_hash(&self) -> B256 {
        self.app_hash
    }

    fn context(
        &self,
        height: u64,
        time: i64,
        hash: B256,
        proposer: &str,
        misbehavior: &[Misbehavior],
        phase: Phase,
    ) -> BlockContext {
        BlockContext {
            height,
            time,
            hash,
            proposer: proposer.to_string(),
            misbehavior: misbehavior
                .iter()
                .map(|evidence| evidence.validator_address.clone())
                .collect(),
            phase,
        }
    }

    /// Transactions the proposer adds on its own: the due SLA rollup and one
    /// deregistration per misbehaving validator.
    async fn protocol_txs(
        &self,
        q: &mut Queries<'_>,
        ctx: &BlockContext,
    ) -> eyre::Result<Vec<SignedTransaction>> {
        let mut txs = Vec::new();
        if let Some(rollup) = expected_rollup(
            q,
            self.validator.network().sla_rollup_interval,
            ctx.height,
            ctx.time,
            &ctx.proposer,
        )
        .await?
        {
            txs.push(SignedTransaction::new(
                format!("sla-rollup-{}", ctx.height),
                Transaction::SlaRollup(rollup),
            ));
        }

        let misbehaving: BTreeSet<&String> = ctx.misbehavior.iter().collect();
        for address in misbehaving {
            let Some(validator) = q.validator_by_address(address).await? else {
                debug!(%address, "misbehaving validator is not registered");
                continue;
            };
            txs.push(SignedTransaction::new(
                format!("misbehavior-{}-{address}", ctx.height),
                Transaction::ValidatorDeregistration(ValidatorMisbehaviorDeregistration {
                    consensus_address: validator.consensus_address,
                    consensus_pubkey: validator.consensus_pubkey,
                }),
            ));
        }

        txs.into_iter()
            .map(|tx| tx.sign(&self.key).wrap_err("sign protocol transaction"))
            .collect()
    }

    /// Validation shared by proposal building and checking.
    async fn check_candidate(
        &self,
        q: &mut Queries<'_>,
        ctx: &BlockContext,
        hash: &TxHash,
        tx: &SignedTransaction,
    ) -> Result<(), ValidationError> {
        if q.transaction(&hash.to_string()).await?.is_some() {
            return Err(ValidationError::AlreadyFinalized(hash.to_string()));
        }
        self.validator.validate(q, ctx, tx).await.map(|_| ())
    }

    /// Applies one block transaction inside its own savepoint.
    async fn finalize_tx(
        &self,
        block_tx: &mut sqlx::Transaction<'static, Sqlite>,
        ctx: &BlockContext,
        hash: &str,
        bytes: &Bytes,
        effects: &mut BlockEffects,
    ) -> eyre::Result<(u32, String, &'static str)> {
        let Some(tx) = decode_canonical(bytes) else {
            return Ok((CODE_UNPARSABLE, "transaction does not decode".into(), "unknown"));
        };
        let kind = tx.kind().as_str();

        let mut savepoint = block_tx.begin().await.wrap_err("begin tx savepoint")?;
        let mut q = Queries::new(&mut savepoint);
        let result = match q.transaction(hash).await? {
            Some(_) => Err(ValidationError::AlreadyFinalized(hash.to_string())),
            None => {
                let mut tx_effects = BlockEffects::default();
                self.validator
                    .finalize(&mut q, ctx, hash, &tx, &mut tx_effects)
                    .await
                    .map(|()| tx_effects)
            }
        };
        match result {
            Ok(tx_effects) => {
                savepoint.commit().await.wrap_err("commit tx savepoint")?;
                effects.merge(tx_effects);
                Ok((CODE_OK, String::new(), kind))
            }
            Err(err) => {
                savepoint
                    .rollback()
                    .await
                    .wrap_err("roll back tx savepoint")?;
                if err.is_internal() {
                    error!(?err, %hash, "transaction failed on a store error");
                } else {
                    warn!(%err, %hash, %kind, "transaction failed");
                }
                Ok((CODE_FINALIZE_FAILED, err.to_string(), kind))
            }
        }
    }
}

#[async_trait::async_trait]
impl Application for CoreApp {
    async fn info(&mut self) -> eyre::Result<InfoResponse> {
        let mut conn = self.store.reader().await?;
        let mut q = Queries::new(&mut conn);
        if let Some(state) = q.latest_app_state().await? {
            self.height = state.height;
            self.app_hash = state.app_hash;
        }
        self.cache.set_current_height(self.height);
        self.cache.set_app_hash(self.app_hash);
        self.cache.set_validators(q.validators().await?);
        Ok(InfoResponse {
            version: concat!("chorus/", env!("CARGO_PKG_VERSION")).to_string(),
            last_block_height: self.height,
            last_block_app_hash: self.app_hash,
        })
    }

    async fn init_chain(&mut self, request: InitChainRequest) -> eyre::Result<InitChainResponse> {
        if request.chain_id != self.chain_id {
            bail!(
                "engine chain id `{}` does not match configured `{}`",
                request.chain_id,
                self.chain_id
            );
        }
        info!(chain_id = %request.chain_id, validators = request.validators.len(), "chain initialized");
        Ok(InitChainResponse {
            app_hash: self.app_hash,
            validators: request.validators,
        })
    }

    async fn check_tx(&mut self, tx: &[u8]) -> CheckTxResponse {
        let Some(signed) = decode_canonical(tx) else {
            return CheckTxResponse {
                code: CODE_UNPARSABLE,
                log: "transaction does not decode".into(),
            };
        };
        if let Err(err) = signed.recover_signer() {
            return CheckTxResponse {
                code: CODE_REJECTED,
                log: err.to_string(),
            };
        }
        if let Some(expiration) = signed.expiration
            && expiration < self.height
        {
            return CheckTxResponse {
                code: CODE_REJECTED,
                log: format!("transaction expired at {expiration}"),
            };
        }
        CheckTxResponse::default()
    }

    async fn prepare_proposal(
        &mut self,
        request: PrepareProposalRequest,
    ) -> eyre::Result<PrepareProposalResponse> {
        let ctx = self.context(
            request.height,
            request.time,
            B256::ZERO,
            &request.proposer_address,
            &request.misbehavior,
            Phase::Proposal,
        );
        let mut conn = self.store.reader().await?;
        let mut q = Queries::new(&mut conn);

        let mut candidates = Vec::new();
        for tx in self.protocol_txs(&mut q, &ctx).await? {
            let bytes = Bytes::from(tx.encode()?);
            candidates.push((tx, bytes));
        }
        let batch = MAX_BLOCK_TXS.saturating_sub(candidates.len());
        candidates.extend(
            self.mempool
                .get_batch(batch, request.height)
                .into_iter()
                .map(|pooled| (pooled.transaction.clone(), pooled.bytes.clone())),
        );

        let mut accepted = Vec::with_capacity(candidates.len());
        let mut total_bytes = 0u64;
        for (tx, bytes) in candidates {
            let hash = tx_hash(&bytes);
            if let Err(err) = self.check_candidate(&mut q, &ctx, &hash, &tx).await {
                warn!(%err, %hash, kind = %tx.kind(), "dropping transaction from proposal");
                continue;
            }
            let size = bytes.len() as u64;
            if request.max_tx_bytes > 0 && total_bytes + size > request.max_tx_bytes {
                debug!(%hash, "proposal is full");
                continue;
            }
            total_bytes += size;
            accepted.push((tx, bytes));
        }

        sort_by_priority(&mut accepted, |(tx, _)| tx);
        debug!(height = request.height, txs = accepted.len(), "proposal prepared");
        Ok(PrepareProposalResponse {
            txs: accepted.into_iter().map(|(_, bytes)| bytes).collect(),
        })
    }

    async fn process_proposal(
        &mut self,
        request: ProcessProposalRequest,
    ) -> eyre::Result<ProcessProposalResponse> {
        let reject = ProcessProposalResponse {
            status: ProposalStatus::Reject,
        };
        let ctx = self.context(
            request.height,
            request.time,
            request.hash,
            &request.proposer_address,
            &request.misbehavior,
            Phase::Proposal,
        );

        let mut txs = Vec::with_capacity(request.txs.len());
        for bytes in &request.txs {
            let Some(tx) = decode_canonical(bytes) else {
                warn!(height = request.height, "proposal carries an undecodable transaction");
                return Ok(reject);
            };
            txs.push((tx_hash(bytes), tx));
        }
        if !txs
            .windows(2)
            .all(|pair| priority(&pair[0].1.transaction) <= priority(&pair[1].1.transaction))
        {
            warn!(height = request.height, "proposal is not in priority order");
            return Ok(reject);
        }

        let mut conn = self.store.reader().await?;
        let mut q = Queries::new(&mut conn);
        for (hash, tx) in &txs {
            match self.check_candidate(&mut q, &ctx, hash, tx).await {
                Ok(()) => {}
                Err(err) if err.is_internal() => {
                    error!(?err, %hash, "could not validate proposal");
                    return Ok(ProcessProposalResponse {
                        status: ProposalStatus::Unknown,
                    });
                }
                Err(err) => {
                    warn!(%err, %hash, kind = %tx.kind(), height = request.height, "rejecting proposal");
                    return Ok(reject);
                }
            }
        }
        Ok(ProcessProposalResponse {
            status: ProposalStatus::Accept,
        })
    }

    async fn finalize_block(
        &mut self,
        request: FinalizeBlockRequest,
    ) -> eyre::Result<FinalizeBlockResponse> {
        if let Some(pending) = self.block.take() {
            warn!(height = pending.height, "discarding uncommitted block");
            pending.tx.rollback().await.wrap_err("roll back block")?;
        }
        let height = request.height;
        let ctx = self.context(
            height,
            request.time,
            request.hash,
            &request.proposer_address,
            &request.misbehavior,
            Phase::Finalize,
        );
        let mut block_tx = self.store.begin().await?;

        let block = Block {
            height,
            hash: request.hash.to_string(),
            proposer: request.proposer_address.clone(),
            chain_id: self.chain_id.clone(),
            created_at: request.time,
        };
        {
            let mut savepoint = block_tx.begin().await.wrap_err("begin block savepoint")?;
            match Queries::new(&mut savepoint).insert_block(&block).await {
                Ok(()) => savepoint.commit().await.wrap_err("commit block savepoint")?,
                Err(err) => {
                    error!(?err, height, "failed recording block");
                    savepoint.rollback().await.wrap_err("roll back block savepoint")?;
                }
            }
        }

        let mut effects = BlockEffects::default();
        let mut tx_results = Vec::with_capacity(request.txs.len());
        let mut tx_hashes = Vec::with_capacity(request.txs.len());
        let mut results = Vec::with_capacity(request.txs.len());
        for (index, bytes) in request.txs.iter().enumerate() {
            let hash = tx_hash(bytes);
            let hash_str = hash.to_string();
            let (code, log, kind) = self
                .finalize_tx(&mut block_tx, &ctx, &hash_str, bytes, &mut effects)
                .await?;

            let mut q = Queries::new(&mut block_tx);
            q.insert_transaction(&StoredTransaction {
                tx_hash: hash_str.clone(),
                block_height: height,
                tx_index: index as u32,
                result_code: code,
                transaction: bytes.clone(),
                created_at: request.time,
            })
            .await?;
            q.insert_tx_stat(&hash_str, kind, height, request.time)
                .await?;
            metrics::counter!("chorus_txs_finalized_total", "code" => code.to_string())
                .increment(1);

            tx_hashes.push(hash);
            results.push((hash_str, code));
            tx_results.push(ExecTxResult { code, log });
        }

        {
            let mut savepoint = block_tx.begin().await.wrap_err("begin pos savepoint")?;
            match self
                .pos
                .on_finalize(&mut Queries::new(&mut savepoint), height, &request.hash)
                .await
            {
                Ok(()) => savepoint.commit().await.wrap_err("commit pos savepoint")?,
                Err(err) => {
                    error!(?err, height, "proof of storage hook failed");
                    savepoint.rollback().await.wrap_err("roll back pos savepoint")?;
                }
            }
        }

        let retain_height = if self.archive {
            None
        } else {
            next_retain_height(height, self.retain_height, self.last_retain_height)
        };
        let mut q = Queries::new(&mut block_tx);
        if let Some(retain) = retain_height {
            let pruned = q
                .delete_challenges_before(height.saturating_sub(self.retain_height))
                .await?;
            debug!(retain, pruned, "pruned pos challenges");
        }

        let app_hash = next_app_hash(&self.app_hash, &request.txs);
        q.insert_app_state(height, app_hash).await?;
        metrics::counter!("chorus_blocks_finalized_total").increment(1);
        info!(height, txs = request.txs.len(), %app_hash, "block finalized");

        let validator_updates = effects.validator_updates();
        self.block = Some(PendingBlock {
            tx: block_tx,
            height,
            app_hash,
            tx_hashes,
            results,
            effects,
            retain_height,
        });
        Ok(FinalizeBlockResponse {
            tx_results,
            validator_updates,
            app_hash,
        })
    }

    async fn commit(&mut self) -> eyre::Result<CommitResponse> {
        let block = self
            .block
            .take()
            .ok_or_eyre("commit without a finalized block")?;
        block.tx.commit().await.wrap_err("commit block")?;
        self.height = block.height;
        self.app_hash = block.app_hash;

        self.mempool.remove_batch(&block.tx_hashes);
        for (index, (tx_hash, code)) in block.results.into_iter().enumerate() {
            self.events.publish(
                &tx_finalized_topic(&tx_hash),
                Event::TxFinalized {
                    tx_hash,
                    height: block.height,
                    index: index as u32,
                    code,
                },
            );
        }
        for (topic, event) in block.effects.events {
            self.events.publish(&topic, event);
        }

        self.cache.set_current_height(block.height);
        self.cache.set_app_hash(block.app_hash);
        let mut conn = self.store.reader().await?;
        self.cache
            .set_validators(Queries::new(&mut conn).validators().await?);

        if block.height.is_multiple_of(MEMPOOL_SWEEP_INTERVAL) {
            let evicted = self.mempool.evict_expired(block.height);
            debug!(height = block.height, evicted, "swept expired mempool entries");
        }
        metrics::gauge!("chorus_mempool_size").set(self.mempool.len() as f64);

        let retain_height = match block.retain_height {
            Some(retain) => {
                self.last_retain_height = retain;
                retain
            }
            None => 0,
        };
        Ok(CommitResponse { retain_height })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn app_hash_chains_over_raw_bytes() {
        let txs = [Bytes::from_static(b"one"), Bytes::from_static(b"two")];
        let mut hasher = Sha256::new();
        hasher.update(B256::repeat_byte(1));
        hasher.update(b"onetwo");
        let expected = B256::from_slice(&hasher.finalize());

        assert_eq!(next_app_hash(&B256::repeat_byte(1), &txs), expected);
        assert_ne!(next_app_hash(&B256::ZERO, &txs), expected);
    }

    #[test_case(10, 604_800, 604_800, None ; "young chain")]
    #[test_case(1_209_601, 604_800, 604_800, Some(1_209_601) ; "first advance")]
    #[test_case(1_209_602, 604_800, 1_209_601, None ; "just advanced")]
    #[test_case(1_814_402, 604_800, 1_209_601, Some(1_814_402) ; "second advance")]
    fn retain_height_advances_in_steps(latest: u64, retain: u64, last: u64, expected: Option<u64>) {
        assert_eq!(next_retain_height(latest, retain, last), expected);
    }

    #[test]
    fn non_canonical_bytes_do_not_decode() {
        let tx = SignedTransaction::new("r", Transaction::Plays(Default::default()));
        let mut bytes = tx.encode().unwrap();
        assert!(decode_canonical(&bytes).is_some());
        bytes.push(0);
        assert!(decode_canonical(&bytes).is_none());
    }
}
