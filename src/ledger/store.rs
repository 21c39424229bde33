//! Account balances and the append-only journal.
//!
//! Every balance write is a compare-and-set against the exact stored value
//! and pairs with one journal row in the same transaction. There is no
//! unconditional `UPDATE accounts SET balance = ...` anywhere.

use anyhow::anyhow;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::storage::Storage;

/// Bounded retries for conditional balance writes under contention.
const BALANCE_CAS_RETRIES: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    /// Public transfer handle, safe to share with other users.
    pub alias: String,
    pub balance: Decimal,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Journal entry categories. Amounts are signed deltas so an account's
/// journal replays to its balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalKind {
    Opening,
    TradeStake,
    TradePayout,
    TradeLoss,
    StakeRefund,
    TransferOut,
    TransferIn,
    TransferRefund,
}

impl JournalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalKind::Opening => "OPENING",
            JournalKind::TradeStake => "TRADE_STAKE",
            JournalKind::TradePayout => "TRADE_PAYOUT",
            JournalKind::TradeLoss => "TRADE_LOSS",
            JournalKind::StakeRefund => "STAKE_REFUND",
            JournalKind::TransferOut => "TRANSFER_OUT",
            JournalKind::TransferIn => "TRANSFER_IN",
            JournalKind::TransferRefund => "TRANSFER_REFUND",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OPENING" => Some(JournalKind::Opening),
            "TRADE_STAKE" => Some(JournalKind::TradeStake),
            "TRADE_PAYOUT" => Some(JournalKind::TradePayout),
            "TRADE_LOSS" => Some(JournalKind::TradeLoss),
            "STAKE_REFUND" => Some(JournalKind::StakeRefund),
            "TRANSFER_OUT" => Some(JournalKind::TransferOut),
            "TRANSFER_IN" => Some(JournalKind::TransferIn),
            "TRANSFER_REFUND" => Some(JournalKind::TransferRefund),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: String,
    pub account_id: String,
    pub kind: JournalKind,
    pub amount: Decimal,
    pub ref_id: Option<String>,
    pub note: Option<String>,
    pub created_at: i64,
}

#[derive(Clone)]
pub struct LedgerStore {
    storage: Storage,
    starting_balance: Decimal,
}

impl LedgerStore {
    pub fn new(storage: Storage, starting_balance: Decimal) -> Self {
        Self {
            storage,
            starting_balance,
        }
    }

    /// Fetch the account for an authenticated identity, provisioning it with
    /// the starting balance (journaled as OPENING) on first touch.
    pub async fn get_or_create(&self, account_id: &str) -> CoreResult<Account> {
        let mut conn = self.storage.lock().await;

        if let Some(account) = query_account(&conn, account_id)? {
            return Ok(account);
        }

        let now = Utc::now().timestamp();
        let alias = generate_alias();
        let balance = self.starting_balance.normalize();

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO accounts (id, alias, balance, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![account_id, alias, balance.to_string(), now, now],
        )?;
        append_journal(
            &tx,
            account_id,
            JournalKind::Opening,
            balance,
            None,
            Some("account opened"),
            now,
        )?;
        tx.commit()?;

        info!(account = %account_id, alias = %alias, balance = %balance, "🏦 Ledger account opened");

        Ok(Account {
            id: account_id.to_string(),
            alias,
            balance,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(&self, account_id: &str) -> CoreResult<Option<Account>> {
        let conn = self.storage.lock().await;
        query_account(&conn, account_id)
    }

    pub async fn get_by_alias(&self, alias: &str) -> CoreResult<Option<Account>> {
        let conn = self.storage.lock().await;

        let row = conn
            .prepare_cached(
                "SELECT id, alias, balance, created_at, updated_at
                 FROM accounts WHERE alias = ?1",
            )?
            .query_row(params![alias.trim()], account_row)
            .optional()?;

        row.map(raw_into_account).transpose()
    }

    /// Conditionally remove `amount` from the account. Fails with
    /// `InsufficientFunds` before touching anything if the balance is short.
    /// Returns the new balance.
    pub async fn debit(
        &self,
        account_id: &str,
        amount: Decimal,
        kind: JournalKind,
        ref_id: Option<&str>,
        note: Option<&str>,
    ) -> CoreResult<Decimal> {
        self.apply_delta(account_id, -amount, kind, ref_id, note)
            .await
    }

    /// Conditionally add `amount` to the account. Returns the new balance.
    pub async fn credit(
        &self,
        account_id: &str,
        amount: Decimal,
        kind: JournalKind,
        ref_id: Option<&str>,
        note: Option<&str>,
    ) -> CoreResult<Decimal> {
        self.apply_delta(account_id, amount, kind, ref_id, note)
            .await
    }

    /// Shared compare-and-set loop behind `debit` and `credit`. A negative
    /// delta must be covered by the current balance.
    async fn apply_delta(
        &self,
        account_id: &str,
        delta: Decimal,
        kind: JournalKind,
        ref_id: Option<&str>,
        note: Option<&str>,
    ) -> CoreResult<Decimal> {
        for attempt in 0..BALANCE_CAS_RETRIES {
            let mut conn = self.storage.lock().await;
            let now = Utc::now().timestamp();

            let tx = conn.transaction()?;
            let Some((balance, raw)) = read_balance(&tx, account_id)? else {
                return Err(CoreError::NotFound(format!("account {account_id}")));
            };

            if delta < Decimal::ZERO && balance < -delta {
                return Err(CoreError::InsufficientFunds {
                    requested: -delta,
                    available: balance,
                });
            }

            let updated = balance + delta;
            match write_balance(&tx, account_id, &raw, updated, now) {
                Ok(()) => {
                    append_journal(&tx, account_id, kind, delta, ref_id, note, now)?;
                    tx.commit()?;
                    return Ok(updated);
                }
                Err(CoreError::Conflict(_)) => {
                    debug!(
                        account = %account_id,
                        attempt,
                        "balance write contended, retrying"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(CoreError::Conflict(format!(
            "balance update for account {account_id} contended after {BALANCE_CAS_RETRIES} attempts"
        )))
    }

    /// Recent journal entries for one account, newest first.
    pub async fn journal_for_account(
        &self,
        account_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<JournalEntry>> {
        let limit = limit.clamp(1, 500) as i64;
        let conn = self.storage.lock().await;

        let mut stmt = conn.prepare_cached(
            "SELECT id, account_id, kind, amount, ref_id, note, created_at
             FROM journal WHERE account_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![account_id, limit], journal_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(raw_into_journal_entry).collect()
    }

    /// All journal entries tied to one session or transfer, oldest first.
    pub async fn journal_for_ref(&self, ref_id: &str) -> CoreResult<Vec<JournalEntry>> {
        let conn = self.storage.lock().await;

        let mut stmt = conn.prepare_cached(
            "SELECT id, account_id, kind, amount, ref_id, note, created_at
             FROM journal WHERE ref_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![ref_id], journal_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(raw_into_journal_entry).collect()
    }
}

// ===== Row mapping =====

type AccountRow = (String, String, String, i64, i64);
type JournalRow = (String, String, String, String, Option<String>, Option<String>, i64);

fn account_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn journal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JournalRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn raw_into_account((id, alias, balance, created_at, updated_at): AccountRow) -> CoreResult<Account> {
    Ok(Account {
        id,
        alias,
        balance: parse_amount(&balance)?,
        created_at,
        updated_at,
    })
}

fn raw_into_journal_entry(
    (id, account_id, kind, amount, ref_id, note, created_at): JournalRow,
) -> CoreResult<JournalEntry> {
    let kind = JournalKind::from_str(&kind)
        .ok_or_else(|| CoreError::Storage(anyhow!("unknown journal kind: {kind}")))?;
    Ok(JournalEntry {
        id,
        account_id,
        kind,
        amount: parse_amount(&amount)?,
        ref_id,
        note,
        created_at,
    })
}

fn parse_amount(text: &str) -> CoreResult<Decimal> {
    text.parse::<Decimal>()
        .map_err(|_| CoreError::Storage(anyhow!("corrupt decimal value in storage: {text}")))
}

fn query_account(conn: &Connection, account_id: &str) -> CoreResult<Option<Account>> {
    let row = conn
        .prepare_cached(
            "SELECT id, alias, balance, created_at, updated_at
             FROM accounts WHERE id = ?1",
        )?
        .query_row(params![account_id], account_row)
        .optional()?;

    row.map(raw_into_account).transpose()
}

fn generate_alias() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("bb_{}", &hex[..10])
}

// ===== Transaction-scoped primitives =====
//
// The settlement engine and the atomic transfer path compose these inside
// their own transactions so a status flip, its balance effect, and its
// journal rows commit or roll back together. `Transaction` derefs to
// `Connection`, so both callers pass `&tx`.

/// Read a balance as (parsed value, raw stored text). The raw text is the
/// compare value for the subsequent `write_balance` CAS.
pub(crate) fn read_balance(
    conn: &Connection,
    account_id: &str,
) -> CoreResult<Option<(Decimal, String)>> {
    let raw: Option<String> = conn
        .prepare_cached("SELECT balance FROM accounts WHERE id = ?1")?
        .query_row(params![account_id], |row| row.get(0))
        .optional()?;

    match raw {
        Some(text) => {
            let parsed = parse_amount(&text)?;
            Ok(Some((parsed, text)))
        }
        None => Ok(None),
    }
}

/// Compare-and-set balance write: succeeds only if the stored text still
/// equals what `read_balance` returned.
pub(crate) fn write_balance(
    conn: &Connection,
    account_id: &str,
    expected_raw: &str,
    updated: Decimal,
    now: i64,
) -> CoreResult<()> {
    let rows = conn.execute(
        "UPDATE accounts SET balance = ?1, updated_at = ?2
         WHERE id = ?3 AND balance = ?4",
        params![updated.normalize().to_string(), now, account_id, expected_raw],
    )?;

    if rows == 0 {
        return Err(CoreError::Conflict(format!(
            "balance of account {account_id} changed underneath the write"
        )));
    }
    Ok(())
}

pub(crate) fn append_journal(
    conn: &Connection,
    account_id: &str,
    kind: JournalKind,
    amount: Decimal,
    ref_id: Option<&str>,
    note: Option<&str>,
    now: i64,
) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO journal (id, account_id, kind, amount, ref_id, note, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            Uuid::new_v4().to_string(),
            account_id,
            kind.as_str(),
            amount.normalize().to_string(),
            ref_id,
            note,
            now
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_ledger() -> LedgerStore {
        let storage = Storage::open_in_memory().unwrap();
        LedgerStore::new(storage, dec!(10000))
    }

    #[tokio::test]
    async fn test_provisioning_grants_starting_balance_once() {
        let ledger = test_ledger();

        let first = ledger.get_or_create("user-1").await.unwrap();
        assert_eq!(first.balance, dec!(10000));
        assert!(first.alias.starts_with("bb_"));

        // Second touch returns the same account, no second grant.
        let second = ledger.get_or_create("user-1").await.unwrap();
        assert_eq!(second.balance, dec!(10000));
        assert_eq!(second.alias, first.alias);

        let journal = ledger.journal_for_account("user-1", 50).await.unwrap();
        let openings = journal
            .iter()
            .filter(|e| e.kind == JournalKind::Opening)
            .count();
        assert_eq!(openings, 1);
    }

    #[tokio::test]
    async fn test_debit_and_credit_pair_with_journal_entries() {
        let ledger = test_ledger();
        ledger.get_or_create("user-1").await.unwrap();

        let after_debit = ledger
            .debit("user-1", dec!(250.50), JournalKind::TradeStake, Some("s1"), None)
            .await
            .unwrap();
        assert_eq!(after_debit, dec!(9749.50));

        let after_credit = ledger
            .credit("user-1", dec!(100), JournalKind::TradePayout, Some("s1"), None)
            .await
            .unwrap();
        assert_eq!(after_credit, dec!(9849.50));

        let entries = ledger.journal_for_ref("s1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, JournalKind::TradeStake);
        assert_eq!(entries[0].amount, dec!(-250.50));
        assert_eq!(entries[1].kind, JournalKind::TradePayout);
        assert_eq!(entries[1].amount, dec!(100));
    }

    #[tokio::test]
    async fn test_journal_replays_to_balance() {
        let ledger = test_ledger();
        ledger.get_or_create("user-1").await.unwrap();
        ledger
            .debit("user-1", dec!(100), JournalKind::TradeStake, Some("s1"), None)
            .await
            .unwrap();
        ledger
            .credit("user-1", dec!(180), JournalKind::TradePayout, Some("s1"), None)
            .await
            .unwrap();

        let account = ledger.get("user-1").await.unwrap().unwrap();
        let journal = ledger.journal_for_account("user-1", 100).await.unwrap();
        let replayed: Decimal = journal.iter().map(|e| e.amount).sum();
        assert_eq!(replayed, account.balance);
    }

    #[tokio::test]
    async fn test_debit_rejects_overdraw_without_mutation() {
        let ledger = test_ledger();
        ledger.get_or_create("user-1").await.unwrap();

        let err = ledger
            .debit("user-1", dec!(10000.01), JournalKind::TransferOut, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientFunds { .. }));

        let account = ledger.get("user-1").await.unwrap().unwrap();
        assert_eq!(account.balance, dec!(10000));
        // Only the OPENING entry exists.
        assert_eq!(ledger.journal_for_account("user-1", 50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_debit_unknown_account_is_not_found() {
        let ledger = test_ledger();
        let err = ledger
            .debit("ghost", dec!(1), JournalKind::TransferOut, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_lookup_by_alias() {
        let ledger = test_ledger();
        let account = ledger.get_or_create("user-1").await.unwrap();

        let found = ledger.get_by_alias(&account.alias).await.unwrap().unwrap();
        assert_eq!(found.id, "user-1");

        assert!(ledger.get_by_alias("bb_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_balance_can_reach_exactly_zero() {
        let ledger = test_ledger();
        ledger.get_or_create("user-1").await.unwrap();

        let after = ledger
            .debit("user-1", dec!(10000), JournalKind::TransferOut, None, None)
            .await
            .unwrap();
        assert_eq!(after, Decimal::ZERO);
    }
}
