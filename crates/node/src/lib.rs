//! The chorus node: the replicated state machine behind the consensus engine
//! and everything around it.
//!
//! - [`app::CoreApp`] implements the engine callbacks in [`abci`], validating
//!   and finalizing transactions through [`validation`].
//! - [`registry`] mirrors the external service provider registry into the
//!   validator set, with [`attest`] and [`peers`] gathering endorsements.
//! - [`pos`] runs proof-of-storage challenges off finalized block hashes.
//! - [`rpc`] is the client facing JSON-RPC surface and [`node`] wires it all
//!   together, optionally producing blocks with [`solo`].

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod abci;
pub mod app;
pub mod attest;
pub mod cache;
pub mod events;
pub mod node;
pub mod peers;
pub mod pos;
pub mod registry;
pub mod rpc;
pub mod solo;
pub mod submit;
pub mod validation;

pub use app::CoreApp;
pub use node::{NodeBuilder, NodeHandle};
