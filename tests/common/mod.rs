#![allow(dead_code)]

//! Shared fixtures for the integration tests: a full core stack over a
//! throwaway SQLite file.

use rust_decimal::Decimal;
use tempfile::NamedTempFile;

use binbroker_backend::ledger::LedgerStore;
use binbroker_backend::market::PriceBoard;
use binbroker_backend::models::Policy;
use binbroker_backend::notify::Notifier;
use binbroker_backend::sessions::{ExpirySweeper, SessionStore, SettlementEngine};
use binbroker_backend::storage::Storage;
use binbroker_backend::transfers::TransferProcessor;

pub struct Core {
    pub storage: Storage,
    pub ledger: LedgerStore,
    pub sessions: SessionStore,
    pub engine: SettlementEngine,
    pub sweeper: ExpirySweeper,
    pub transfers: TransferProcessor,
    // Holds the database file open for the duration of the test.
    _db: NamedTempFile,
}

pub fn build_core(starting_balance: Decimal, atomic_transfers: bool) -> Core {
    let db = NamedTempFile::new().expect("create temp db");
    let storage = Storage::open(db.path().to_str().expect("utf8 temp path")).expect("open storage");

    let policy = Policy {
        starting_balance,
        ..Policy::default()
    };

    let ledger = LedgerStore::new(storage.clone(), policy.starting_balance);
    let sessions = SessionStore::new(storage.clone());
    let notifier = Notifier::new(64);
    let engine = SettlementEngine::new(
        storage.clone(),
        ledger.clone(),
        sessions.clone(),
        PriceBoard::new(policy.price_nudge_pct),
        notifier.clone(),
        policy,
    );
    let sweeper = ExpirySweeper::new(sessions.clone(), engine.clone());
    let transfers = TransferProcessor::new(
        storage.clone(),
        ledger.clone(),
        notifier,
        atomic_transfers,
    );

    Core {
        storage,
        ledger,
        sessions,
        engine,
        sweeper,
        transfers,
        _db: db,
    }
}

/// Rewind a session's creation time so its window has elapsed.
pub async fn backdate_session(storage: &Storage, session_id: &str, secs: i64) {
    let conn = storage.lock().await;
    conn.execute(
        "UPDATE trade_sessions SET created_at = created_at - ?1 WHERE id = ?2",
        rusqlite::params![secs, session_id],
    )
    .expect("backdate session");
}
