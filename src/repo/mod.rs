pub mod template;
pub mod stage_def;
pub mod dependency;
pub mod project;
pub mod instance;

pub use template::*;
pub use stage_def::*;
pub use dependency::*;
pub use project::*;
pub use instance::*;

use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Begin a write transaction that holds the database write lock from the start.
///
/// Graph mutations read the current edge set and then write based on it; with
/// `BEGIN IMMEDIATE` no other writer can commit between the read and the write.
pub(crate) fn write_tx(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}

/// Current time as a Unix timestamp
pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
