//! Core types shared by every chorus crate: keys and signatures, entity
//! addresses, rendezvous selection and the transaction model.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod address;
pub mod crypto;
pub mod rendezvous;
pub mod transaction;

pub use address::{AddressContext, AddressKind, entity_address};
pub use crypto::{ConsensusKey, CryptoError, DelegateKey, consensus_address, wallet_string};
pub use transaction::{SignedTransaction, Transaction, TxHash, TxKind};
