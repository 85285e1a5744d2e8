use serde::{Deserialize, Serialize};

/// Blocks proposed by one validator inside a rollup window.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaNodeReport {
    /// Consensus address.
    pub address: String,
    pub blocks_proposed: u64,
}

/// Proposer generated summary of the window `[block_start, block_end]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaRollup {
    /// Unix seconds of the proposal that carried the rollup.
    pub timestamp: i64,
    pub block_start: u64,
    pub block_end: u64,
    /// Sorted by address, one entry per registered validator.
    pub reports: Vec<SlaNodeReport>,
}

impl SlaRollup {
    /// Expected blocks per validator over the window.
    pub fn quota(&self) -> u64 {
        let validators = self.reports.len() as u64;
        if validators == 0 {
            return 0;
        }
        self.block_end.saturating_sub(self.block_start) / validators
    }
}
