//! Persisted transfer records.
//!
//! A transfer row is written exactly once, with status `completed`, after
//! both ledger legs have been applied. No partially-complete row is ever
//! visible to a reader.

use anyhow::anyhow;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::storage::Storage;

pub const STATUS_COMPLETED: &str = "completed";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: String,
    pub from_account: String,
    pub to_account: String,
    pub amount: Decimal,
    pub note: Option<String>,
    pub status: String,
    pub created_at: i64,
}

#[derive(Clone)]
pub struct TransferStore {
    storage: Storage,
}

impl TransferStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn get(&self, transfer_id: &str) -> CoreResult<Option<Transfer>> {
        let conn = self.storage.lock().await;

        let row = conn
            .prepare_cached(
                "SELECT id, from_account, to_account, amount, note, status, created_at
                 FROM transfers WHERE id = ?1",
            )?
            .query_row(params![transfer_id], transfer_row)
            .optional()?;

        row.map(raw_into_transfer).transpose()
    }

    /// Transfers touching one account (either side), newest first.
    pub async fn list_for_account(
        &self,
        account_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<Transfer>> {
        let limit = limit.clamp(1, 500) as i64;
        let conn = self.storage.lock().await;

        let mut stmt = conn.prepare_cached(
            "SELECT id, from_account, to_account, amount, note, status, created_at
             FROM transfers WHERE from_account = ?1 OR to_account = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![account_id, limit], transfer_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(raw_into_transfer).collect()
    }
}

// ===== Row mapping =====

type TransferRow = (String, String, String, String, Option<String>, String, i64);

fn transfer_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransferRow> {
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

fn raw_into_transfer(
    (id, from_account, to_account, amount, note, status, created_at): TransferRow,
) -> CoreResult<Transfer> {
    let amount = amount
        .parse::<Decimal>()
        .map_err(|_| CoreError::Storage(anyhow!("corrupt transfer amount: {amount}")))?;
    Ok(Transfer {
        id,
        from_account,
        to_account,
        amount,
        note,
        status,
        created_at,
    })
}

// ===== Transaction-scoped primitives =====

/// Record a completed transfer. Callers only invoke this once both ledger
/// legs have succeeded (or inside the transaction that applies them).
pub(crate) fn insert_completed(
    conn: &Connection,
    transfer: &Transfer,
) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO transfers (id, from_account, to_account, amount, note, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            transfer.id,
            transfer.from_account,
            transfer.to_account,
            transfer.amount.normalize().to_string(),
            transfer.note,
            STATUS_COMPLETED,
            transfer.created_at,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sample(id: &str) -> Transfer {
        Transfer {
            id: id.to_string(),
            from_account: "user-a".to_string(),
            to_account: "user-b".to_string(),
            amount: dec!(42.50),
            note: Some("lunch".to_string()),
            status: STATUS_COMPLETED.to_string(),
            created_at: Utc::now().timestamp(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let storage = Storage::open_in_memory().unwrap();
        let store = TransferStore::new(storage.clone());

        {
            let conn = storage.lock().await;
            insert_completed(&conn, &sample("t1")).unwrap();
        }

        let loaded = store.get("t1").await.unwrap().unwrap();
        assert_eq!(loaded.from_account, "user-a");
        assert_eq!(loaded.to_account, "user-b");
        assert_eq!(loaded.amount, dec!(42.50));
        assert_eq!(loaded.status, STATUS_COMPLETED);
        assert_eq!(loaded.note.as_deref(), Some("lunch"));
    }

    #[tokio::test]
    async fn test_list_covers_both_sides() {
        let storage = Storage::open_in_memory().unwrap();
        let store = TransferStore::new(storage.clone());

        {
            let conn = storage.lock().await;
            insert_completed(&conn, &sample("t1")).unwrap();
            let mut reverse = sample("t2");
            reverse.from_account = "user-b".to_string();
            reverse.to_account = "user-a".to_string();
            insert_completed(&conn, &reverse).unwrap();
        }

        let for_a = store.list_for_account("user-a", 10).await.unwrap();
        assert_eq!(for_a.len(), 2);
        let for_b = store.list_for_account("user-b", 10).await.unwrap();
        assert_eq!(for_b.len(), 2);
        assert!(store
            .list_for_account("user-c", 10)
            .await
            .unwrap()
            .is_empty());
    }
}
