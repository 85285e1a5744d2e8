//! Relational chain state.
//!
//! [`StateStore`] owns the connection pool. All reads and writes go through
//! [`Queries`], which borrows a single connection: a pooled one for reads
//! outside of block processing, or the block scoped transaction while a block
//! is being finalized.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod db;
pub mod models;
pub mod queries;

pub use db::StateStore;
pub use queries::Queries;
