//! Signing and broadcasting transactions this node originates.

use std::sync::Arc;

use alloy_primitives::Bytes;
use chorus_primitives::{
    DelegateKey, SignedTransaction, Transaction, TxHash, transaction::SignError,
};
use chorus_transaction_pool::{InsertError, InsertOutcome, Mempool};
use tracing::{debug, info};

use crate::peers::Peers;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("failed signing transaction")]
    Sign(#[from] SignError),
    #[error("local mempool refused transaction")]
    Rejected(#[source] InsertError),
}

/// Signs transactions with the node's delegate key, adds them to the local
/// pool and relays them to every peer.
#[derive(Clone, Debug)]
pub struct TxSubmitter {
    key: DelegateKey,
    mempool: Arc<Mempool>,
    peers: Peers,
}

impl TxSubmitter {
    pub fn new(key: DelegateKey, mempool: Arc<Mempool>, peers: Peers) -> Self {
        Self { key, mempool, peers }
    }

    pub fn key(&self) -> &DelegateKey {
        &self.key
    }

    /// Signs `transaction` under a fresh request id and submits it.
    pub async fn submit(&self, transaction: Transaction) -> Result<TxHash, SubmitError> {
        let kind = transaction.kind();
        let bytes = SignedTransaction::new(uuid::Uuid::new_v4().to_string(), transaction)
            .sign(&self.key)?
            .encode()
            .map_err(SignError::from)?;
        let hash = self.submit_bytes(bytes.into()).await?;
        info!(%hash, %kind, "submitted transaction");
        Ok(hash)
    }

    /// Adds already signed bytes to the local pool and forwards them.
    pub async fn submit_bytes(&self, bytes: Bytes) -> Result<TxHash, SubmitError> {
        let hash = match self.mempool.insert(bytes.clone()) {
            InsertOutcome::Accepted(hash) => hash,
            InsertOutcome::AlreadyPresent => chorus_primitives::transaction::tx_hash(&bytes),
            InsertOutcome::Rejected(err) => return Err(SubmitError::Rejected(err)),
        };
        let accepted = self.peers.forward(bytes).await;
        debug!(%hash, accepted, peers = self.peers.len(), "forwarded transaction");
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use chorus_primitives::transaction::{TrackPlay, TrackPlays};
    use chorus_transaction_pool::PoolConfig;

    use super::*;
    use crate::cache::Cache;

    #[tokio::test]
    async fn submitted_transactions_land_in_the_pool() {
        let mempool = Arc::new(Mempool::new(PoolConfig::default(), Arc::new(Cache::new())));
        let key = DelegateKey::random();
        let submitter = TxSubmitter::new(
            key.clone(),
            mempool.clone(),
            Peers::new(chorus_primitives::wallet_string(&key.address())),
        );

        let plays = Transaction::Plays(TrackPlays {
            plays: vec![TrackPlay {
                track_id: "1".into(),
                ..Default::default()
            }],
        });
        let first = submitter.submit(plays.clone()).await.unwrap();
        let second = submitter.submit(plays).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(mempool.len(), 2);
        let pooled = mempool.get(&first).unwrap();
        assert_eq!(pooled.signer, key.address());
    }

    #[tokio::test]
    async fn resubmitting_bytes_is_not_an_error() {
        let mempool = Arc::new(Mempool::new(PoolConfig::default(), Arc::new(Cache::new())));
        let key = DelegateKey::random();
        let submitter = TxSubmitter::new(key.clone(), mempool.clone(), Peers::new(String::new()));
        let bytes: Bytes = SignedTransaction::new("r", Transaction::Plays(TrackPlays::default()))
            .sign(&key)
            .unwrap()
            .encode()
            .unwrap()
            .into();

        let first = submitter.submit_bytes(bytes.clone()).await.unwrap();
        let second = submitter.submit_bytes(bytes).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(mempool.len(), 1);
    }
}
