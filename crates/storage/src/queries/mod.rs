//! Typed queries over a single SQLite connection.

use sqlx::SqliteConnection;

mod blocks;
mod ddex;
mod entities;
mod pos;
mod rewards;
mod sla;
mod validators;

/// Query facade over one connection.
///
/// Construct it from a pooled connection for reads, or from the block
/// transaction (or a savepoint inside it) for writes.
pub struct Queries<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> Queries<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }
}

impl std::fmt::Debug for Queries<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queries").finish_non_exhaustive()
    }
}

/// Stored height columns are signed.
pub(crate) fn to_db(value: u64) -> i64 {
    value as i64
}

pub(crate) fn from_db(value: i64) -> u64 {
    value as u64
}
