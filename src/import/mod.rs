//! Multi-sheet client import: preview staging, per-row apply with capacity
//! admission, and reversible rollback.

pub mod apply;
pub mod capacity;
pub mod catalog;
pub mod clients;
pub mod error;
pub mod jobs;
pub mod notify;
pub mod preview;
pub mod resolve;
pub mod rollback;
pub mod settings;
pub mod sheets;

use error::Result;
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Runs `f` in an `IMMEDIATE` transaction, committing on `Ok`.
///
/// Taking the write lock up front serialises capacity admission across
/// connections to the same workspace database.
pub(crate) fn with_immediate_tx<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let out = f(&*tx)?;
    tx.commit()?;
    Ok(out)
}
