//! `SQLite`-backed persistence for the receipt ledger and the task queue.
//!
//! Both stores share one connection behind a mutex: the ledger is the
//! single writer for receipt rows, and the terminal lease calls commit a
//! receipt append and a task flip in the same transaction, which requires
//! the same connection. WAL mode keeps readers unblocked while a write is
//! in flight.
//!
//! Timestamps are stored as microseconds since the Unix epoch so that
//! `stored_at` has a total order with rowid tie-breaking; the wire carries
//! RFC 3339 via `chrono` serde.

// SQLite returns i64 for integer columns; the counters and sizes stored
// here are always non-negative and far below the i64 range.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]

mod ledger;
mod tasks;


use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

pub use ledger::{AppendOutcome, ChainPage, LedgerError, ReceiptLedger};
pub use tasks::{
    CompletionOutcome, CompletionRecord, FailureRecord, FailureReport, LeaseGrant, SweepStats,
    TaskError, TaskFilter, TaskStore,
};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors from the storage layer itself.
///
/// Callers treat these as `StoreUnavailable`: transient, retried with
/// backoff, never silently dropped.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A JSON column failed to encode.
    #[error("json encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shared handle to the `SQLite` database.
///
/// Cheap to clone; all clones funnel through the same connection, which is
/// what makes the single-writer discipline for receipts real rather than
/// aspirational.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens or creates the database at `path`, applying the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Acquires the connection. Lock poisoning indicates a panic in
    /// another thread, which is unrecoverable.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Returns a receipt ledger over this store.
    #[must_use]
    pub fn ledger(&self) -> ReceiptLedger {
        ReceiptLedger::new(self.clone())
    }

    /// Returns a task store over this store.
    #[must_use]
    pub fn tasks(&self) -> TaskStore {
        TaskStore::new(self.clone())
    }

    /// Liveness probe: runs `SELECT 1`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub fn ping(&self) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

/// Converts a wire timestamp into its storage representation.
pub(crate) fn to_micros(value: Option<DateTime<Utc>>) -> Option<i64> {
    value.map(|dt| dt.timestamp_micros())
}

/// Converts a storage timestamp back to the wire representation.
pub(crate) fn from_micros(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(DateTime::from_timestamp_micros)
}

/// A column held a value the schema forbids; surfaced as a conversion
/// failure so reads fail loudly instead of fabricating state.
#[derive(Debug, Error)]
#[error("corrupt column {column}: {value:?}")]
pub(crate) struct CorruptColumn {
    pub column: &'static str,
    pub value: String,
}

pub(crate) fn corrupt(
    idx: usize,
    column: &'static str,
    value: &str,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(CorruptColumn {
            column,
            value: value.to_owned(),
        }),
    )
}

pub(crate) fn parse_json_column(
    idx: usize,
    column: &'static str,
    raw: &str,
) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(e),
        ))
        .and_then(|value: serde_json::Value| {
            if value.is_object() {
                Ok(value)
            } else {
                Err(corrupt(idx, column, raw))
            }
        })
}
