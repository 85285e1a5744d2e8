use std::{sync::Arc, time::Duration};

use alloy_primitives::{Bytes, TxHash};
use chorus_primitives::transaction::{ValidatorDeregistration, ValidatorRegistration, tx_hash};
use chorus_storage::{
    Queries, StateStore,
    models::{Entity, ErnRecord, MeadRecord, PieRecord, Play, Reward, StoredTransaction},
};
use chorus_transaction_pool::{InsertError, InsertOutcome, Mempool};
use jsonrpsee::{core::RpcResult, types::ErrorObjectOwned};
use sqlx::{Sqlite, pool::PoolConnection};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use super::{
    BlockResponse, CoreApiServer, FAILED_PRECONDITION, HealthResponse, INVALID_ARGUMENT,
    SlaRollupResponse, StatusResponse, TxLocation, UNAUTHENTICATED, internal_rpc_err, not_found,
    rpc_err,
};
use crate::{
    attest::{AttestError, Attestor},
    cache::Cache,
    events::{Event, EventBus, tx_finalized_topic},
    peers::Peers,
};

/// How long `sendTransaction` waits for the transaction to be finalized.
pub const INCLUSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Serves the `core` namespace.
#[derive(Clone, Debug)]
pub struct CoreRpc {
    chain_id: String,
    store: StateStore,
    cache: Cache,
    mempool: Arc<Mempool>,
    peers: Peers,
    events: EventBus,
    attestor: Attestor,
}

impl CoreRpc {
    pub fn new(
        chain_id: String,
        store: StateStore,
        cache: Cache,
        mempool: Arc<Mempool>,
        peers: Peers,
        events: EventBus,
        attestor: Attestor,
    ) -> Self {
        Self {
            chain_id,
            store,
            cache,
            mempool,
            peers,
            events,
            attestor,
        }
    }

    async fn reader(&self) -> RpcResult<PoolConnection<Sqlite>> {
        self.store.reader().await.map_err(internal_rpc_err)
    }

    async fn finalized(&self, tx_hash: &str) -> RpcResult<Option<StoredTransaction>> {
        let mut conn = self.reader().await?;
        Queries::new(&mut conn)
            .transaction(tx_hash)
            .await
            .map_err(internal_rpc_err)
    }

    fn ensure_ready(&self) -> RpcResult<()> {
        if !self.cache.is_ready() {
            return Err(rpc_err(FAILED_PRECONDITION, "node is not ready"));
        }
        Ok(())
    }

    fn insert(&self, tx: Bytes) -> RpcResult<TxHash> {
        match self.mempool.insert(tx.clone()) {
            InsertOutcome::Accepted(hash) => Ok(hash),
            InsertOutcome::AlreadyPresent => Ok(tx_hash(&tx)),
            InsertOutcome::Rejected(err) => Err(insert_rpc_err(&err)),
        }
    }
}

fn insert_rpc_err(err: &InsertError) -> ErrorObjectOwned {
    let code = match err {
        InsertError::Signature(_) => UNAUTHENTICATED,
        InsertError::Full { .. } | InsertError::Expired { .. } => FAILED_PRECONDITION,
        InsertError::TooLarge { .. } | InsertError::Decode(_) | InsertError::NonCanonical => {
            INVALID_ARGUMENT
        }
    };
    rpc_err(code, err.to_string())
}

fn attest_rpc_err(err: AttestError) -> ErrorObjectOwned {
    match err {
        AttestError::Codec(_) | AttestError::Sign(_) | AttestError::Store(_) => {
            internal_rpc_err(eyre::Report::new(err))
        }
        AttestError::Deadline { .. } => rpc_err(INVALID_ARGUMENT, err.to_string()),
        AttestError::NotRegistered { .. }
        | AttestError::AlreadyOnChain(_)
        | AttestError::NotOnChain(_)
        | AttestError::StillRegistered(_)
        | AttestError::Registry(_) => rpc_err(FAILED_PRECONDITION, err.to_string()),
    }
}

#[async_trait::async_trait]
impl CoreApiServer for CoreRpc {
    async fn ping(&self) -> RpcResult<String> {
        Ok("pong".to_string())
    }

    async fn health(&self) -> RpcResult<HealthResponse> {
        let healthy = match self.store.reader().await {
            Ok(mut conn) => Queries::new(&mut conn).latest_block().await.is_ok(),
            Err(_) => false,
        };
        Ok(HealthResponse {
            healthy,
            ready: self.cache.is_ready(),
            current_height: self.cache.current_height(),
        })
    }

    async fn status(&self) -> RpcResult<StatusResponse> {
        let ready = self.cache.is_ready();
        let catching_up = self.cache.is_catching_up();
        Ok(StatusResponse {
            ready,
            current_height: self.cache.current_height(),
            chain_id: self.chain_id.clone(),
            peers: self.peers.len(),
            synced: ready && !catching_up,
            catching_up,
            app_hash: self.cache.app_hash(),
            mempool_size: self.mempool.len(),
        })
    }

    async fn send_transaction(&self, tx: Bytes) -> RpcResult<TxLocation> {
        self.ensure_ready()?;
        let hash = tx_hash(&tx).to_string();
        let mut finalized = self.events.subscribe(&tx_finalized_topic(&hash));
        if let Some(stored) = self.finalized(&hash).await? {
            return Ok(TxLocation::from(&stored));
        }

        self.insert(tx.clone())?;
        let peers = self.peers.clone();
        tokio::spawn(async move {
            let accepted = peers.forward(tx).await;
            debug!(accepted, "relayed client transaction");
        });

        let wait = async {
            loop {
                match finalized.recv().await {
                    Ok(Event::TxFinalized {
                        tx_hash,
                        height,
                        index,
                        code,
                    }) => {
                        return Some(TxLocation {
                            tx_hash,
                            height,
                            index,
                            code,
                        });
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        };
        match tokio::time::timeout(INCLUSION_TIMEOUT, wait).await {
            Ok(Some(location)) => Ok(location),
            Ok(None) | Err(_) => Err(rpc_err(
                FAILED_PRECONDITION,
                format!("transaction {hash} not finalized within {INCLUSION_TIMEOUT:?}"),
            )),
        }
    }

    async fn forward_transaction(&self, tx: Bytes) -> RpcResult<TxHash> {
        self.insert(tx)
    }

    async fn transaction(&self, tx_hash: TxHash) -> RpcResult<StoredTransaction> {
        self.finalized(&tx_hash.to_string())
            .await?
            .ok_or_else(|| not_found(format!("transaction {tx_hash}")))
    }

    async fn block(&self, height: u64) -> RpcResult<BlockResponse> {
        let mut conn = self.reader().await?;
        let mut q = Queries::new(&mut conn);
        let block = q
            .block(height)
            .await
            .map_err(internal_rpc_err)?
            .ok_or_else(|| not_found(format!("block {height}")))?;
        let transactions = q
            .block_transactions(height)
            .await
            .map_err(internal_rpc_err)?;
        Ok(BlockResponse {
            block,
            transactions,
        })
    }

    async fn registration_attestation(&self, body: ValidatorRegistration) -> RpcResult<Bytes> {
        self.attestor
            .endorse_registration(&body)
            .await
            .map_err(attest_rpc_err)
    }

    async fn deregistration_attestation(&self, body: ValidatorDeregistration) -> RpcResult<Bytes> {
        self.attestor
            .endorse_deregistration(&body)
            .await
            .map_err(attest_rpc_err)
    }

    async fn entity(&self, entity_type: String, entity_id: i64) -> RpcResult<Entity> {
        let mut conn = self.reader().await?;
        Queries::new(&mut conn)
            .entity(&entity_type, entity_id)
            .await
            .map_err(internal_rpc_err)?
            .ok_or_else(|| not_found(format!("{entity_type} {entity_id}")))
    }

    async fn plays(&self, track_id: String) -> RpcResult<Vec<Play>> {
        let mut conn = self.reader().await?;
        Queries::new(&mut conn)
            .plays_for_track(&track_id)
            .await
            .map_err(internal_rpc_err)
    }

    async fn ern(&self, address: String) -> RpcResult<ErnRecord> {
        let mut conn = self.reader().await?;
        Queries::new(&mut conn)
            .latest_ern(&address)
            .await
            .map_err(internal_rpc_err)?
            .ok_or_else(|| not_found(format!("ern {address}")))
    }

    async fn mead(&self, address: String) -> RpcResult<MeadRecord> {
        let mut conn = self.reader().await?;
        Queries::new(&mut conn)
            .latest_mead(&address)
            .await
            .map_err(internal_rpc_err)?
            .ok_or_else(|| not_found(format!("mead {address}")))
    }

    async fn pie(&self, address: String) -> RpcResult<PieRecord> {
        let mut conn = self.reader().await?;
        Queries::new(&mut conn)
            .latest_pie(&address)
            .await
            .map_err(internal_rpc_err)?
            .ok_or_else(|| not_found(format!("pie {address}")))
    }

    async fn rewards(&self, authority: String) -> RpcResult<Vec<Reward>> {
        let mut conn = self.reader().await?;
        Queries::new(&mut conn)
            .rewards_by_authority(&authority)
            .await
            .map_err(internal_rpc_err)
    }

    async fn latest_sla_rollup(&self) -> RpcResult<SlaRollupResponse> {
        let mut conn = self.reader().await?;
        let mut q = Queries::new(&mut conn);
        let rollup = q
            .latest_sla_rollup()
            .await
            .map_err(internal_rpc_err)?
            .ok_or_else(|| not_found("sla rollup"))?;
        let reports = q.sla_reports(rollup.id).await.map_err(internal_rpc_err)?;
        Ok(SlaRollupResponse { rollup, reports })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_errors_map_to_rpc_codes() {
        let code = |err: InsertError| insert_rpc_err(&err).code();

        assert_eq!(code(InsertError::Full { capacity: 1 }), FAILED_PRECONDITION);
        assert_eq!(
            code(InsertError::Expired {
                expiration: 1,
                height: 2
            }),
            FAILED_PRECONDITION
        );
        assert_eq!(code(InsertError::NonCanonical), INVALID_ARGUMENT);
        assert_eq!(
            code(InsertError::TooLarge { size: 2, max: 1 }),
            INVALID_ARGUMENT
        );
    }

    #[test]
    fn attestation_refusals_are_preconditions() {
        let err = attest_rpc_err(AttestError::AlreadyOnChain("AA".into()));
        assert_eq!(err.code(), FAILED_PRECONDITION);
        let err = attest_rpc_err(AttestError::Deadline {
            deadline: 1,
            height: 5,
        });
        assert_eq!(err.code(), INVALID_ARGUMENT);
    }
}
