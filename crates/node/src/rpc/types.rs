use alloy_primitives::B256;
use chorus_storage::models::{Block, SlaReport, SlaRollupRecord, StoredTransaction};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// The state store answered.
    pub healthy: bool,
    pub ready: bool,
    pub current_height: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub ready: bool,
    pub current_height: u64,
    pub chain_id: String,
    /// Registered peers this node holds a client for.
    pub peers: usize,
    pub synced: bool,
    pub catching_up: bool,
    pub app_hash: B256,
    pub mempool_size: usize,
}

/// Where a transaction was finalized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxLocation {
    pub tx_hash: String,
    pub height: u64,
    pub index: u32,
    pub code: u32,
}

impl From<&StoredTransaction> for TxLocation {
    fn from(tx: &StoredTransaction) -> Self {
        Self {
            tx_hash: tx.tx_hash.clone(),
            height: tx.block_height,
            index: tx.tx_index,
            code: tx.result_code,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockResponse {
    pub block: Block,
    pub transactions: Vec<StoredTransaction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaRollupResponse {
    pub rollup: SlaRollupRecord,
    pub reports: Vec<SlaReport>,
}
