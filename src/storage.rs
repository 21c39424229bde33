//! SQLite Storage
//! Mission: One durable home for accounts, trade sessions, transfers, and the journal
//!
//! All tables share a single database file so multi-row financial mutations
//! can commit inside one SQLite transaction.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    alias TEXT UNIQUE NOT NULL,
    balance TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS trade_sessions (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id),
    symbol TEXT NOT NULL,
    stake TEXT NOT NULL,
    duration_secs INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    outcome_source TEXT,
    created_at INTEGER NOT NULL,
    resolved_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_sessions_account_created
    ON trade_sessions(account_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_sessions_status
    ON trade_sessions(status);

CREATE TABLE IF NOT EXISTS transfers (
    id TEXT PRIMARY KEY,
    from_account TEXT NOT NULL,
    to_account TEXT NOT NULL,
    amount TEXT NOT NULL,
    note TEXT,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transfers_from_created
    ON transfers(from_account, created_at DESC);

CREATE TABLE IF NOT EXISTS journal (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    amount TEXT NOT NULL,
    ref_id TEXT,
    note TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_journal_account_created
    ON journal(account_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_journal_ref
    ON journal(ref_id);
"#;

/// Shared handle to the SQLite connection.
///
/// Balances are stored as canonical decimal TEXT and never mutated or
/// compared by SQL arithmetic; all money math happens in `rust_decimal`.
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open database")?;
        Self::init(conn)
    }

    /// In-memory database for tests and ephemeral deployments.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        conn.execute_batch(SCHEMA_SQL).context("init schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Serializes every reader and writer; multi-step mutations hold the
    /// guard for their whole read-check-write sequence.
    pub async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_applies_cleanly() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.lock().await;

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        for expected in ["accounts", "journal", "trade_sessions", "transfers"] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.lock().await;
        conn.execute_batch(SCHEMA_SQL).unwrap();
    }
}
