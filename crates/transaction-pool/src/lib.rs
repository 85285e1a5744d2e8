//! Pending transaction pool.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod pool;

pub use pool::{
    DEFAULT_DEADLINE_BLOCKS, InsertError, InsertOutcome, Mempool, MempoolView, PoolConfig,
    PooledTransaction,
};
