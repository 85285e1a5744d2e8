//! Bounded, insertion ordered set of pending transactions.
//!
//! The pool only performs cheap checks on insertion: size, canonical decoding,
//! signature recovery and expiration. Semantic validation happens when a
//! proposal is built. Entries are handed out in insertion order and only leave
//! the pool after their block commits or once their deadline passes.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes};
use chorus_primitives::{
    SignedTransaction, TxHash,
    transaction::{CodecError, SignError, tx_hash},
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

/// Blocks a transaction without an explicit expiration may wait in the pool.
pub const DEFAULT_DEADLINE_BLOCKS: u64 = 10;

/// Chain state the pool needs for its checks.
pub trait MempoolView: Send + Sync {
    fn current_height(&self) -> u64;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_txs: usize,
    pub max_tx_bytes: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_txs: 30_000,
            max_tx_bytes: 300 * 1024,
        }
    }
}

/// Why a transaction was refused.
#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    #[error("transaction of {size} bytes exceeds limit of {max}")]
    TooLarge { size: usize, max: usize },
    #[error("mempool is full ({capacity} transactions)")]
    Full { capacity: usize },
    #[error("transaction is not decodable")]
    Decode(#[source] CodecError),
    #[error("transaction bytes are not in canonical form")]
    NonCanonical,
    #[error("transaction signature does not recover")]
    Signature(#[source] SignError),
    #[error("transaction expired at {expiration}, current height {height}")]
    Expired { expiration: u64, height: u64 },
}

impl InsertError {
    fn label(&self) -> &'static str {
        match self {
            Self::TooLarge { .. } => "too_large",
            Self::Full { .. } => "full",
            Self::Decode(_) => "decode",
            Self::NonCanonical => "non_canonical",
            Self::Signature(_) => "signature",
            Self::Expired { .. } => "expired",
        }
    }
}

#[derive(Debug)]
pub enum InsertOutcome {
    AlreadyPresent,
    Accepted(TxHash),
    Rejected(InsertError),
}

impl InsertOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// A decoded pending transaction.
#[derive(Debug)]
pub struct PooledTransaction {
    pub hash: TxHash,
    /// Exact bytes as received. Proposals carry these unchanged.
    pub bytes: Bytes,
    pub transaction: SignedTransaction,
    pub signer: Address,
    /// Last height the entry is handed out for.
    pub deadline: u64,
}

#[derive(Debug)]
pub struct Mempool {
    config: PoolConfig,
    view: Arc<dyn MempoolView>,
    txs: Mutex<IndexMap<TxHash, Arc<PooledTransaction>>>,
}

impl std::fmt::Debug for dyn MempoolView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MempoolView")
            .field("current_height", &self.current_height())
            .finish()
    }
}

impl Mempool {
    pub fn new(config: PoolConfig, view: Arc<dyn MempoolView>) -> Self {
        Self {
            config,
            view,
            txs: Mutex::new(IndexMap::new()),
        }
    }

    /// Returns the number of pending transactions.
    pub fn len(&self) -> usize {
        self.txs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.lock().is_empty()
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.txs.lock().contains_key(hash)
    }

    pub fn get(&self, hash: &TxHash) -> Option<Arc<PooledTransaction>> {
        self.txs.lock().get(hash).cloned()
    }

    /// Checks and inserts raw transaction bytes.
    pub fn insert(&self, bytes: Bytes) -> InsertOutcome {
        let outcome = match self.check(bytes) {
            Ok(pooled) => self.insert_checked(pooled),
            Err(err) => InsertOutcome::Rejected(err),
        };
        if let InsertOutcome::Rejected(err) = &outcome {
            debug!(%err, "rejected transaction");
            metrics::counter!("chorus_mempool_rejected_total", "reason" => err.label())
                .increment(1);
        }
        outcome
    }

    fn check(&self, bytes: Bytes) -> Result<PooledTransaction, InsertError> {
        if bytes.len() > self.config.max_tx_bytes {
            return Err(InsertError::TooLarge {
                size: bytes.len(),
                max: self.config.max_tx_bytes,
            });
        }
        let transaction = SignedTransaction::decode(&bytes).map_err(InsertError::Decode)?;
        if transaction.encode().map_err(InsertError::Decode)? != bytes.as_ref() {
            return Err(InsertError::NonCanonical);
        }
        let signer = transaction
            .recover_signer()
            .map_err(InsertError::Signature)?;

        let height = self.view.current_height();
        if let Some(expiration) = transaction.expiration
            && expiration < height
        {
            return Err(InsertError::Expired { expiration, height });
        }
        let deadline = transaction
            .expiration
            .unwrap_or(height + DEFAULT_DEADLINE_BLOCKS);

        Ok(PooledTransaction {
            hash: tx_hash(&bytes),
            bytes,
            transaction,
            signer,
            deadline,
        })
    }

    fn insert_checked(&self, pooled: PooledTransaction) -> InsertOutcome {
        let mut txs = self.txs.lock();
        if txs.contains_key(&pooled.hash) {
            return InsertOutcome::AlreadyPresent;
        }
        if txs.len() >= self.config.max_txs {
            return InsertOutcome::Rejected(InsertError::Full {
                capacity: self.config.max_txs,
            });
        }
        let hash = pooled.hash;
        txs.insert(hash, Arc::new(pooled));
        metrics::gauge!("chorus_mempool_size").set(txs.len() as f64);
        InsertOutcome::Accepted(hash)
    }

    /// Returns up to `max` transactions includable at `height`, oldest first,
    /// without removing them.
    pub fn get_batch(&self, max: usize, height: u64) -> Vec<Arc<PooledTransaction>> {
        self.txs
            .lock()
            .values()
            .filter(|pooled| pooled.deadline >= height && pooled.transaction.is_live_at(height))
            .take(max)
            .cloned()
            .collect()
    }

    /// Removes the given transactions, typically after their block committed.
    ///
    /// Returns the number of transactions removed.
    pub fn remove_batch<'a>(&self, hashes: impl IntoIterator<Item = &'a TxHash>) -> usize {
        let mut txs = self.txs.lock();
        let removed = hashes
            .into_iter()
            .filter(|hash| txs.shift_remove(*hash).is_some())
            .count();
        metrics::gauge!("chorus_mempool_size").set(txs.len() as f64);
        removed
    }

    /// Evicts entries whose deadline is below `height`.
    ///
    /// Returns the number of transactions removed.
    pub fn evict_expired(&self, height: u64) -> usize {
        let mut txs = self.txs.lock();
        let before = txs.len();
        txs.retain(|_, pooled| pooled.deadline >= height);
        metrics::gauge!("chorus_mempool_size").set(txs.len() as f64);
        before - txs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_primitives::{
        DelegateKey, Transaction,
        transaction::{TrackPlay, TrackPlays},
    };
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct Height(AtomicU64);

    impl MempoolView for Height {
        fn current_height(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn pool_at(height: u64, config: PoolConfig) -> (Mempool, Arc<Height>) {
        let view = Arc::new(Height(AtomicU64::new(height)));
        (Mempool::new(config, view.clone()), view)
    }

    fn signed(request_id: &str, expiration: Option<u64>) -> Bytes {
        let mut tx = SignedTransaction::new(
            request_id,
            Transaction::Plays(TrackPlays {
                plays: vec![TrackPlay {
                    user_id: "u".into(),
                    track_id: "t".into(),
                    ..Default::default()
                }],
            }),
        );
        tx.expiration = expiration;
        let tx = tx.sign(&DelegateKey::random()).unwrap();
        tx.encode().unwrap().into()
    }

    #[test]
    fn insert_then_batch_returns_the_transaction() {
        let (pool, _) = pool_at(5, PoolConfig::default());
        let bytes = signed("a", None);
        let InsertOutcome::Accepted(hash) = pool.insert(bytes.clone()) else {
            panic!("expected acceptance");
        };
        let batch = pool.get_batch(1, 5);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].hash, hash);
        assert_eq!(batch[0].bytes, bytes);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn duplicate_insert_is_reported() {
        let (pool, _) = pool_at(1, PoolConfig::default());
        let bytes = signed("a", None);
        assert!(matches!(pool.insert(bytes.clone()), InsertOutcome::Accepted(_)));
        assert!(matches!(pool.insert(bytes), InsertOutcome::AlreadyPresent));
    }

    #[test]
    fn expiration_boundary() {
        let (pool, _) = pool_at(7, PoolConfig::default());
        assert!(matches!(pool.insert(signed("a", Some(7))), InsertOutcome::Accepted(_)));
        assert!(matches!(
            pool.insert(signed("b", Some(6))),
            InsertOutcome::Rejected(InsertError::Expired {
                expiration: 6,
                height: 7
            })
        ));
    }

    #[test]
    fn capacity_and_size_limits() {
        let (pool, _) = pool_at(
            1,
            PoolConfig {
                max_txs: 1,
                max_tx_bytes: 300 * 1024,
            },
        );
        assert!(matches!(pool.insert(signed("a", None)), InsertOutcome::Accepted(_)));
        assert!(matches!(
            pool.insert(signed("b", None)),
            InsertOutcome::Rejected(InsertError::Full { capacity: 1 })
        ));

        let (pool, _) = pool_at(
            1,
            PoolConfig {
                max_txs: 10,
                max_tx_bytes: 8,
            },
        );
        assert!(matches!(
            pool.insert(signed("a", None)),
            InsertOutcome::Rejected(InsertError::TooLarge { max: 8, .. })
        ));
    }

    #[test]
    fn rejects_garbage_and_unsigned() {
        let (pool, _) = pool_at(1, PoolConfig::default());
        assert!(pool.insert(Bytes::from_static(b"not a tx")).is_rejected());

        let unsigned = SignedTransaction::new(
            "u",
            Transaction::Plays(TrackPlays::default()),
        );
        assert!(matches!(
            pool.insert(unsigned.encode().unwrap().into()),
            InsertOutcome::Rejected(InsertError::Signature(_))
        ));
    }

    #[test]
    fn batch_preserves_insertion_order_and_skips_stale() {
        let (pool, view) = pool_at(1, PoolConfig::default());
        let first = signed("first", Some(3));
        let second = signed("second", None);
        let third = signed("third", None);
        for bytes in [&first, &second, &third] {
            assert!(matches!(pool.insert(bytes.clone()), InsertOutcome::Accepted(_)));
        }
        let batch: Vec<_> = pool.get_batch(10, 1).iter().map(|p| p.bytes.clone()).collect();
        assert_eq!(batch, vec![first, second.clone(), third.clone()]);

        view.0.store(4, Ordering::Relaxed);
        let batch: Vec<_> = pool.get_batch(10, 4).iter().map(|p| p.bytes.clone()).collect();
        assert_eq!(batch, vec![second, third]);
        assert_eq!(pool.get_batch(1, 4).len(), 1);
    }

    #[test]
    fn remove_and_evict() {
        let (pool, _) = pool_at(1, PoolConfig::default());
        let InsertOutcome::Accepted(a) = pool.insert(signed("a", Some(2))) else {
            panic!()
        };
        let InsertOutcome::Accepted(b) = pool.insert(signed("b", None)) else {
            panic!()
        };
        assert_eq!(pool.remove_batch(&[a, a]), 1);
        assert!(pool.contains(&b));

        // default deadline is insert height + 10
        assert_eq!(pool.evict_expired(11), 0);
        assert_eq!(pool.evict_expired(12), 1);
        assert!(pool.is_empty());
    }
}
