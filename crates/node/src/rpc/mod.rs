//! JSON-RPC surface of a node under the `core` namespace.
//!
//! Clients submit and read back transactions. Peers use the same surface to
//! relay transactions and to request attestation signatures, through the
//! generated [`CoreApiClient`].

use alloy_primitives::{Bytes, TxHash};
use chorus_primitives::transaction::{ValidatorDeregistration, ValidatorRegistration};
use chorus_storage::models::{Entity, ErnRecord, MeadRecord, PieRecord, Play, Reward, StoredTransaction};
use jsonrpsee::{core::RpcResult, proc_macros::rpc, types::ErrorObjectOwned};

mod server;
mod types;

pub use server::CoreRpc;
pub use types::{BlockResponse, HealthResponse, SlaRollupResponse, StatusResponse, TxLocation};

/// Malformed request or transaction.
pub const INVALID_ARGUMENT: i32 = -32602;
/// A signature did not verify.
pub const UNAUTHENTICATED: i32 = 4001;
pub const NOT_FOUND: i32 = 4004;
/// The request is well formed but the node's state does not allow it.
pub const FAILED_PRECONDITION: i32 = 4009;
pub const INTERNAL: i32 = -32603;

#[rpc(server, client, namespace = "core")]
pub trait CoreApi {
    #[method(name = "ping")]
    async fn ping(&self) -> RpcResult<String>;

    #[method(name = "getHealth")]
    async fn health(&self) -> RpcResult<HealthResponse>;

    #[method(name = "getStatus")]
    async fn status(&self) -> RpcResult<StatusResponse>;

    /// Submits a signed transaction and waits for it to be finalized.
    #[method(name = "sendTransaction")]
    async fn send_transaction(&self, tx: Bytes) -> RpcResult<TxLocation>;

    /// Adds a transaction relayed by a peer to the local pool.
    #[method(name = "forwardTransaction")]
    async fn forward_transaction(&self, tx: Bytes) -> RpcResult<TxHash>;

    #[method(name = "getTransaction")]
    async fn transaction(&self, tx_hash: TxHash) -> RpcResult<StoredTransaction>;

    #[method(name = "getBlock")]
    async fn block(&self, height: u64) -> RpcResult<BlockResponse>;

    /// Signs `body` if this node agrees the validator should join.
    #[method(name = "getRegistrationAttestation")]
    async fn registration_attestation(&self, body: ValidatorRegistration) -> RpcResult<Bytes>;

    /// Signs `body` if this node agrees the validator should leave.
    #[method(name = "getDeregistrationAttestation")]
    async fn deregistration_attestation(&self, body: ValidatorDeregistration) -> RpcResult<Bytes>;

    #[method(name = "getEntity")]
    async fn entity(&self, entity_type: String, entity_id: i64) -> RpcResult<Entity>;

    #[method(name = "getPlays")]
    async fn plays(&self, track_id: String) -> RpcResult<Vec<Play>>;

    #[method(name = "getErn")]
    async fn ern(&self, address: String) -> RpcResult<ErnRecord>;

    #[method(name = "getMead")]
    async fn mead(&self, address: String) -> RpcResult<MeadRecord>;

    #[method(name = "getPie")]
    async fn pie(&self, address: String) -> RpcResult<PieRecord>;

    /// Rewards `authority` may manage.
    #[method(name = "getRewards")]
    async fn rewards(&self, authority: String) -> RpcResult<Vec<Reward>>;

    #[method(name = "getLatestSlaRollup")]
    async fn latest_sla_rollup(&self) -> RpcResult<SlaRollupResponse>;
}

pub(crate) fn rpc_err(code: i32, message: impl Into<String>) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, message.into(), None::<()>)
}

pub(crate) fn internal_rpc_err(err: eyre::Report) -> ErrorObjectOwned {
    tracing::error!(?err, "rpc request failed");
    rpc_err(INTERNAL, "internal error")
}

pub(crate) fn not_found(what: impl std::fmt::Display) -> ErrorObjectOwned {
    rpc_err(NOT_FOUND, format!("{what} not found"))
}
