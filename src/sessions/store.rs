//! Persisted trade session records.
//!
//! Rows enter as PENDING and leave exactly once through the conditional
//! update in `mark_resolved`; they are never deleted.

use anyhow::anyhow;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Won,
    Lost,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "PENDING",
            SessionStatus::Won => "WON",
            SessionStatus::Lost => "LOST",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(SessionStatus::Pending),
            "WON" => Some(SessionStatus::Won),
            "LOST" => Some(SessionStatus::Lost),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }
}

/// Which path finalized a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeSource {
    AdminOverride,
    AutoExpiry,
}

impl OutcomeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeSource::AdminOverride => "ADMIN_OVERRIDE",
            OutcomeSource::AutoExpiry => "AUTO_EXPIRY",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ADMIN_OVERRIDE" => Some(OutcomeSource::AdminOverride),
            "AUTO_EXPIRY" => Some(OutcomeSource::AutoExpiry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeSession {
    pub id: String,
    pub account_id: String,
    pub symbol: String,
    pub stake: Decimal,
    pub duration_secs: i64,
    pub status: SessionStatus,
    pub outcome_source: Option<OutcomeSource>,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

impl TradeSession {
    pub fn new_pending(
        account_id: &str,
        symbol: &str,
        stake: Decimal,
        duration_secs: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            symbol: symbol.to_string(),
            stake,
            duration_secs,
            status: SessionStatus::Pending,
            outcome_source: None,
            created_at: Utc::now().timestamp(),
            resolved_at: None,
        }
    }

    pub fn expires_at(&self) -> i64 {
        self.created_at + self.duration_secs
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at()
    }
}

#[derive(Clone)]
pub struct SessionStore {
    storage: Storage,
}

impl SessionStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn insert(&self, session: &TradeSession) -> CoreResult<()> {
        let conn = self.storage.lock().await;
        conn.execute(
            "INSERT INTO trade_sessions
                 (id, account_id, symbol, stake, duration_secs, status,
                  outcome_source, created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session.id,
                session.account_id,
                session.symbol,
                session.stake.normalize().to_string(),
                session.duration_secs,
                session.status.as_str(),
                session.outcome_source.map(|s| s.as_str()),
                session.created_at,
                session.resolved_at,
            ],
        )?;
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> CoreResult<Option<TradeSession>> {
        let conn = self.storage.lock().await;
        read_session(&conn, session_id)
    }

    /// Sessions owned by one account, newest first.
    pub async fn list_for_account(
        &self,
        account_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<TradeSession>> {
        let limit = limit.clamp(1, 500) as i64;
        let conn = self.storage.lock().await;

        let mut stmt = conn.prepare_cached(
            "SELECT id, account_id, symbol, stake, duration_secs, status,
                    outcome_source, created_at, resolved_at
             FROM trade_sessions WHERE account_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![account_id, limit], session_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(raw_into_session).collect()
    }

    /// Every PENDING session across all accounts, oldest first. Admin view.
    pub async fn list_pending(&self) -> CoreResult<Vec<TradeSession>> {
        let conn = self.storage.lock().await;

        let mut stmt = conn.prepare_cached(
            "SELECT id, account_id, symbol, stake, duration_secs, status,
                    outcome_source, created_at, resolved_at
             FROM trade_sessions WHERE status = 'PENDING'
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map([], session_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(raw_into_session).collect()
    }

    /// Ids of PENDING sessions owned by `account_id` whose window has fully
    /// elapsed at `now`.
    pub async fn list_expired_pending(
        &self,
        account_id: &str,
        now: i64,
    ) -> CoreResult<Vec<String>> {
        let conn = self.storage.lock().await;

        let mut stmt = conn.prepare_cached(
            "SELECT id FROM trade_sessions
             WHERE account_id = ?1 AND status = 'PENDING'
               AND created_at + duration_secs < ?2
             ORDER BY created_at ASC",
        )?;
        let ids = stmt
            .query_map(params![account_id, now], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(ids)
    }
}

// ===== Row mapping =====

type SessionRow = (
    String,
    String,
    String,
    String,
    i64,
    String,
    Option<String>,
    i64,
    Option<i64>,
);

fn session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn raw_into_session(
    (id, account_id, symbol, stake, duration_secs, status, outcome_source, created_at, resolved_at): SessionRow,
) -> CoreResult<TradeSession> {
    let status = SessionStatus::from_str(&status)
        .ok_or_else(|| CoreError::Storage(anyhow!("unknown session status: {status}")))?;
    let outcome_source = match outcome_source {
        Some(s) => Some(
            OutcomeSource::from_str(&s)
                .ok_or_else(|| CoreError::Storage(anyhow!("unknown outcome source: {s}")))?,
        ),
        None => None,
    };
    let stake = stake
        .parse::<Decimal>()
        .map_err(|_| CoreError::Storage(anyhow!("corrupt stake value: {stake}")))?;

    Ok(TradeSession {
        id,
        account_id,
        symbol,
        stake,
        duration_secs,
        status,
        outcome_source,
        created_at,
        resolved_at,
    })
}

// ===== Transaction-scoped primitives =====

pub(crate) fn read_session(conn: &Connection, session_id: &str) -> CoreResult<Option<TradeSession>> {
    let row = conn
        .prepare_cached(
            "SELECT id, account_id, symbol, stake, duration_secs, status,
                    outcome_source, created_at, resolved_at
             FROM trade_sessions WHERE id = ?1",
        )?
        .query_row(params![session_id], session_row)
        .optional()?;

    row.map(raw_into_session).transpose()
}

/// Conditional status flip out of PENDING. Returns false when a racing
/// resolver already finalized the session.
pub(crate) fn mark_resolved(
    conn: &Connection,
    session_id: &str,
    status: SessionStatus,
    source: OutcomeSource,
    resolved_at: i64,
) -> CoreResult<bool> {
    let rows = conn.execute(
        "UPDATE trade_sessions
         SET status = ?1, outcome_source = ?2, resolved_at = ?3
         WHERE id = ?4 AND status = 'PENDING'",
        params![status.as_str(), source.as_str(), resolved_at, session_id],
    )?;
    Ok(rows == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_store() -> (SessionStore, Storage) {
        let storage = Storage::open_in_memory().unwrap();
        (SessionStore::new(storage.clone()), storage)
    }

    /// Session rows reference accounts, so store tests seed the owner row.
    async fn seed_account(storage: &Storage, id: &str) {
        let conn = storage.lock().await;
        conn.execute(
            "INSERT INTO accounts (id, alias, balance, created_at, updated_at)
             VALUES (?1, ?2, '0', 0, 0)",
            params![id, format!("bb_{id}")],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let (store, storage) = test_store();
        seed_account(&storage, "user-1").await;

        let session = TradeSession::new_pending("user-1", "BTCUSDT", dec!(100), 300);
        store.insert(&session).await.unwrap();

        let loaded = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.account_id, "user-1");
        assert_eq!(loaded.symbol, "BTCUSDT");
        assert_eq!(loaded.stake, dec!(100));
        assert_eq!(loaded.status, SessionStatus::Pending);
        assert!(loaded.outcome_source.is_none());
        assert!(loaded.resolved_at.is_none());
    }

    #[tokio::test]
    async fn test_expiry_filter_only_matches_elapsed_pending() {
        let (store, storage) = test_store();
        seed_account(&storage, "user-1").await;
        let now = Utc::now().timestamp();

        let mut stale = TradeSession::new_pending("user-1", "BTCUSDT", dec!(100), 60);
        stale.created_at = now - 120;
        store.insert(&stale).await.unwrap();

        let fresh = TradeSession::new_pending("user-1", "ETHUSDT", dec!(100), 600);
        store.insert(&fresh).await.unwrap();

        let expired = store.list_expired_pending("user-1", now).await.unwrap();
        assert_eq!(expired, vec![stale.id.clone()]);

        // Other accounts are untouched by this account's sweep window.
        assert!(store
            .list_expired_pending("user-2", now)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_mark_resolved_flips_exactly_once() {
        let (store, storage) = test_store();
        seed_account(&storage, "user-1").await;

        let session = TradeSession::new_pending("user-1", "BTCUSDT", dec!(100), 300);
        store.insert(&session).await.unwrap();

        let conn = storage.lock().await;
        let now = Utc::now().timestamp();

        let first = mark_resolved(
            &conn,
            &session.id,
            SessionStatus::Won,
            OutcomeSource::AdminOverride,
            now,
        )
        .unwrap();
        assert!(first);

        let second = mark_resolved(
            &conn,
            &session.id,
            SessionStatus::Lost,
            OutcomeSource::AutoExpiry,
            now,
        )
        .unwrap();
        assert!(!second);

        let loaded = read_session(&conn, &session.id).unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Won);
        assert_eq!(loaded.outcome_source, Some(OutcomeSource::AdminOverride));
    }

    #[tokio::test]
    async fn test_list_for_account_newest_first() {
        let (store, storage) = test_store();
        seed_account(&storage, "user-1").await;
        let now = Utc::now().timestamp();

        let mut older = TradeSession::new_pending("user-1", "BTCUSDT", dec!(100), 300);
        older.created_at = now - 100;
        let mut newer = TradeSession::new_pending("user-1", "ETHUSDT", dec!(75), 300);
        newer.created_at = now;
        store.insert(&older).await.unwrap();
        store.insert(&newer).await.unwrap();

        let listed = store.list_for_account("user-1", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }
}
