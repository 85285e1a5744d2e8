//! Deterministic ordering of block transactions.
//!
//! Transactions sort by `(kind rank, sub rank)` and keep their relative order
//! within a class, so objects are created before they are updated, proofs land
//! before their verification, and membership removals apply last.

use chorus_primitives::{
    SignedTransaction,
    transaction::{EntityAction, Transaction, TxKind},
};

/// Kinds in block order.
const KIND_ORDER: [TxKind; 14] = [
    TxKind::ValidatorRegistration,
    TxKind::AttestationRegistration,
    TxKind::StorageProof,
    TxKind::ManageEntity,
    TxKind::Plays,
    TxKind::Release,
    TxKind::RewardCreate,
    TxKind::RewardUpdate,
    TxKind::RewardDelete,
    TxKind::StorageProofVerification,
    TxKind::SlaRollup,
    TxKind::ValidatorDeregistration,
    TxKind::AttestationDeregistration,
    TxKind::Envelope,
];

/// Rank of entity actions that do not parse.
const UNKNOWN_ACTION_RANK: u32 = 9;

pub fn priority(tx: &Transaction) -> (u32, u32) {
    let kind = tx.kind();
    let rank = KIND_ORDER
        .iter()
        .position(|candidate| *candidate == kind)
        .map_or(KIND_ORDER.len() as u32, |position| position as u32);
    let sub_rank = match tx {
        Transaction::ManageEntity(entity) => match entity.parsed_action() {
            Some(EntityAction::Create) => 0,
            Some(EntityAction::Update) => 1,
            Some(EntityAction::Delete) => 2,
            None => UNKNOWN_ACTION_RANK,
        },
        _ => 0,
    };
    (rank, sub_rank)
}

/// Stable sort by [`priority`]. Equal priorities keep their input order.
pub fn sort_by_priority<T>(txs: &mut [T], transaction: impl Fn(&T) -> &SignedTransaction) {
    txs.sort_by_key(|tx| priority(&transaction(tx).transaction));
}
