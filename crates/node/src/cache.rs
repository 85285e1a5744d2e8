//! Lock-free view of chain state shared by the node's background tasks.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use alloy_primitives::B256;
use chorus_storage::models::Validator;
use chorus_transaction_pool::MempoolView;
use parking_lot::RwLock;

#[derive(Clone, Debug, Default)]
pub struct Cache {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    current_height: AtomicU64,
    catching_up: AtomicBool,
    ready: AtomicBool,
    app_hash: RwLock<B256>,
    validators: RwLock<Arc<Vec<Validator>>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Height of the last committed block.
    pub fn current_height(&self) -> u64 {
        self.inner.current_height.load(Ordering::Acquire)
    }

    pub fn set_current_height(&self, height: u64) {
        self.inner.current_height.store(height, Ordering::Release);
    }

    pub fn is_catching_up(&self) -> bool {
        self.inner.catching_up.load(Ordering::Acquire)
    }

    pub fn set_catching_up(&self, catching_up: bool) {
        self.inner.catching_up.store(catching_up, Ordering::Release);
    }

    /// Whether the node finished startup and serves client traffic.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.inner.ready.store(ready, Ordering::Release);
    }

    pub fn app_hash(&self) -> B256 {
        *self.inner.app_hash.read()
    }

    pub fn set_app_hash(&self, app_hash: B256) {
        *self.inner.app_hash.write() = app_hash;
    }

    /// The validator set as of the last commit, sorted by consensus address.
    pub fn validators(&self) -> Arc<Vec<Validator>> {
        self.inner.validators.read().clone()
    }

    pub fn set_validators(&self, validators: Vec<Validator>) {
        *self.inner.validators.write() = Arc::new(validators);
    }

    pub fn validator_by_address(&self, consensus_address: &str) -> Option<Validator> {
        self.validators()
            .iter()
            .find(|validator| validator.consensus_address == consensus_address)
            .cloned()
    }
}

impl MempoolView for Cache {
    fn current_height(&self) -> u64 {
        Self::current_height(self)
    }
}
