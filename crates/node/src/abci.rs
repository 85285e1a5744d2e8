//! The callback surface a BFT consensus engine drives the application through.
//!
//! Requests and responses mirror the engine's application interface. Heights
//! are `u64`, times are unix seconds, and addresses are upper case hex
//! consensus addresses.

use alloy_primitives::{B256, Bytes};

/// Transaction applied or accepted.
pub const CODE_OK: u32 = 0;
/// Bytes did not decode into a canonical signed transaction.
pub const CODE_UNPARSABLE: u32 = 1;
/// Transaction decoded but finalization failed. Its writes were rolled back.
pub const CODE_FINALIZE_FAILED: u32 = 2;
/// CheckTx refused the transaction.
pub const CODE_REJECTED: u32 = 3;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InfoResponse {
    pub version: String,
    pub last_block_height: u64,
    pub last_block_app_hash: B256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitChainRequest {
    pub chain_id: String,
    pub initial_height: u64,
    pub time: i64,
    pub validators: Vec<ValidatorUpdate>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitChainResponse {
    pub app_hash: B256,
    pub validators: Vec<ValidatorUpdate>,
}

/// A voting power change reported back to the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorUpdate {
    /// Raw ed25519 public key.
    pub pub_key: Bytes,
    pub power: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckTxResponse {
    pub code: u32,
    pub log: String,
}

impl CheckTxResponse {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MisbehaviorKind {
    DuplicateVote,
    LightClientAttack,
}

/// Evidence of a validator misbehaving, as reported by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Misbehavior {
    pub kind: MisbehaviorKind,
    pub validator_address: String,
    pub height: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrepareProposalRequest {
    pub max_tx_bytes: u64,
    /// Transactions the engine's own mempool suggests. Ignored, the
    /// application pulls from its pool.
    pub txs: Vec<Bytes>,
    pub misbehavior: Vec<Misbehavior>,
    pub height: u64,
    pub time: i64,
    pub proposer_address: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrepareProposalResponse {
    pub txs: Vec<Bytes>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessProposalRequest {
    pub txs: Vec<Bytes>,
    pub misbehavior: Vec<Misbehavior>,
    pub hash: B256,
    pub height: u64,
    pub time: i64,
    pub proposer_address: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProposalStatus {
    /// The application could not decide.
    #[default]
    Unknown,
    Accept,
    Reject,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessProposalResponse {
    pub status: ProposalStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizeBlockRequest {
    pub txs: Vec<Bytes>,
    pub misbehavior: Vec<Misbehavior>,
    pub hash: B256,
    pub height: u64,
    pub time: i64,
    pub proposer_address: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecTxResult {
    pub code: u32,
    pub log: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizeBlockResponse {
    pub tx_results: Vec<ExecTxResult>,
    pub validator_updates: Vec<ValidatorUpdate>,
    pub app_hash: B256,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitResponse {
    /// Blocks below this height may be pruned by the engine. Zero keeps all.
    pub retain_height: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub height: u64,
    pub format: u32,
    pub chunks: u32,
    pub hash: Bytes,
    pub metadata: Bytes,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListSnapshotsResponse {
    pub snapshots: Vec<Snapshot>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OfferSnapshotRequest {
    pub snapshot: Option<Snapshot>,
    pub app_hash: B256,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OfferSnapshotResult {
    #[default]
    Unknown,
    Accept,
    Abort,
    Reject,
    RejectFormat,
    RejectSender,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadSnapshotChunkRequest {
    pub height: u64,
    pub format: u32,
    pub chunk: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplySnapshotChunkRequest {
    pub index: u32,
    pub chunk: Bytes,
    pub sender: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApplySnapshotChunkResult {
    #[default]
    Unknown,
    Accept,
    Abort,
    Retry,
    RetrySnapshot,
    RejectSnapshot,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplySnapshotChunkResponse {
    pub result: ApplySnapshotChunkResult,
    pub refetch_chunks: Vec<u32>,
    pub reject_senders: Vec<String>,
}

/// The replicated application.
///
/// The engine invokes every callback serially. An `Err` is a block level
/// failure the engine must treat as fatal.
#[async_trait::async_trait]
pub trait Application: Send {
    async fn info(&mut self) -> eyre::Result<InfoResponse>;

    async fn init_chain(&mut self, request: InitChainRequest) -> eyre::Result<InitChainResponse>;

    async fn check_tx(&mut self, tx: &[u8]) -> CheckTxResponse;

    async fn prepare_proposal(
        &mut self,
        request: PrepareProposalRequest,
    ) -> eyre::Result<PrepareProposalResponse>;

    async fn process_proposal(
        &mut self,
        request: ProcessProposalRequest,
    ) -> eyre::Result<ProcessProposalResponse>;

    async fn finalize_block(
        &mut self,
        request: FinalizeBlockRequest,
    ) -> eyre::Result<FinalizeBlockResponse>;

    async fn commit(&mut self) -> eyre::Result<CommitResponse>;

    async fn list_snapshots(&mut self) -> eyre::Result<ListSnapshotsResponse> {
        Ok(ListSnapshotsResponse::default())
    }

    async fn offer_snapshot(
        &mut self,
        _request: OfferSnapshotRequest,
    ) -> eyre::Result<OfferSnapshotResult> {
        Ok(OfferSnapshotResult::default())
    }

    async fn load_snapshot_chunk(&mut self, _request: LoadSnapshotChunkRequest) -> eyre::Result<Bytes> {
        Ok(Bytes::new())
    }

    async fn apply_snapshot_chunk(
        &mut self,
        _request: ApplySnapshotChunkRequest,
    ) -> eyre::Result<ApplySnapshotChunkResponse> {
        Ok(ApplySnapshotChunkResponse::default())
    }
}
