//! Credit Transfer Processor
//! Mission: Debit one account and credit another as a single observable step
//!
//! The default path applies both legs, the transfer row, and both journal
//! entries in one SQLite transaction. The compensating fallback exists for
//! deployments that disable the atomic path: it debits, credits, and if the
//! credit fails it re-credits the sender before reporting the failure. Only
//! when that repair is itself exhausted does the processor report
//! `PartialFailure`, loudly, for manual reconciliation.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::ledger::store as ledger_store;
use crate::ledger::{Account, JournalKind, LedgerStore};
use crate::notify::{NotificationEvent, Notifier};
use crate::storage::Storage;

use super::store::{self as transfer_store, Transfer, STATUS_COMPLETED};

/// Bounded attempts at re-crediting the sender when the credit leg of the
/// compensating path fails.
const COMPENSATION_RETRIES: u32 = 3;

/// How the caller names the receiving account.
#[derive(Debug, Clone)]
pub enum ReceiverRef {
    AccountId(String),
    Alias(String),
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub to: ReceiverRef,
    pub amount: Decimal,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub transfer: Transfer,
    /// Sender's balance after the debit leg.
    pub new_balance: Decimal,
}

#[derive(Clone)]
pub struct TransferProcessor {
    storage: Storage,
    ledger: LedgerStore,
    notifier: Notifier,
    atomic: bool,
}

impl TransferProcessor {
    pub fn new(storage: Storage, ledger: LedgerStore, notifier: Notifier, atomic: bool) -> Self {
        Self {
            storage,
            ledger,
            notifier,
            atomic,
        }
    }

    /// Move `amount` from `from_account` to the resolved receiver.
    pub async fn transfer(
        &self,
        from_account: &str,
        req: TransferRequest,
    ) -> CoreResult<TransferReceipt> {
        if req.amount <= Decimal::ZERO {
            return Err(CoreError::Validation(
                "transfer amount must be positive".to_string(),
            ));
        }
        if req.amount.normalize().scale() > 2 {
            return Err(CoreError::Validation(
                "transfer precision is limited to 2 decimal places".to_string(),
            ));
        }

        let receiver = self.resolve_receiver(&req.to).await?;
        if receiver.id == from_account {
            return Err(CoreError::SelfTransfer);
        }

        let note = req.note.as_deref().map(str::trim).filter(|n| !n.is_empty());
        let receipt = if self.atomic {
            self.transfer_atomic(from_account, &receiver.id, req.amount, note)
                .await?
        } else {
            self.transfer_compensating(from_account, &receiver.id, req.amount, note)
                .await?
        };

        metrics::counter!("binbroker_transfers_completed_total", 1);
        info!(
            transfer = %receipt.transfer.id,
            from = %from_account,
            to = %receiver.id,
            amount = %req.amount,
            atomic = self.atomic,
            "💸 Credit transfer completed"
        );
        self.notifier.emit(NotificationEvent::TransferReceived {
            transfer_id: receipt.transfer.id.clone(),
            account_id: receiver.id.clone(),
            amount: req.amount,
        });

        Ok(receipt)
    }

    async fn resolve_receiver(&self, to: &ReceiverRef) -> CoreResult<Account> {
        let (account, handle) = match to {
            ReceiverRef::AccountId(id) => (self.ledger.get(id).await?, id.as_str()),
            ReceiverRef::Alias(alias) => (self.ledger.get_by_alias(alias).await?, alias.as_str()),
        };
        account.ok_or_else(|| CoreError::ReceiverNotFound(handle.to_string()))
    }

    /// Preferred path: both legs, the transfer row, and both journal entries
    /// commit in one transaction. No reader can ever observe the debit
    /// without the credit.
    async fn transfer_atomic(
        &self,
        from_account: &str,
        to_account: &str,
        amount: Decimal,
        note: Option<&str>,
    ) -> CoreResult<TransferReceipt> {
        let transfer_id = Uuid::new_v4().to_string();
        let mut conn = self.storage.lock().await;
        let now = Utc::now().timestamp();

        let tx = conn.transaction()?;

        let Some((sender_balance, sender_raw)) = ledger_store::read_balance(&tx, from_account)?
        else {
            return Err(CoreError::NotFound(format!("account {from_account}")));
        };
        if sender_balance < amount {
            return Err(CoreError::InsufficientFunds {
                requested: amount,
                available: sender_balance,
            });
        }

        let Some((receiver_balance, receiver_raw)) = ledger_store::read_balance(&tx, to_account)?
        else {
            return Err(CoreError::ReceiverNotFound(to_account.to_string()));
        };

        let new_balance = sender_balance - amount;
        ledger_store::write_balance(&tx, from_account, &sender_raw, new_balance, now)?;
        ledger_store::write_balance(&tx, to_account, &receiver_raw, receiver_balance + amount, now)?;

        ledger_store::append_journal(
            &tx,
            from_account,
            JournalKind::TransferOut,
            -amount,
            Some(&transfer_id),
            note,
            now,
        )?;
        ledger_store::append_journal(
            &tx,
            to_account,
            JournalKind::TransferIn,
            amount,
            Some(&transfer_id),
            note,
            now,
        )?;

        let transfer = Transfer {
            id: transfer_id,
            from_account: from_account.to_string(),
            to_account: to_account.to_string(),
            amount,
            note: note.map(str::to_string),
            status: STATUS_COMPLETED.to_string(),
            created_at: now,
        };
        transfer_store::insert_completed(&tx, &transfer)?;

        tx.commit()?;

        Ok(TransferReceipt {
            transfer,
            new_balance,
        })
    }

    /// Fallback path: sequential debit-then-credit through the ledger's own
    /// conditional primitives, with manual compensation when the credit leg
    /// fails after the debit succeeded.
    pub(crate) async fn transfer_compensating(
        &self,
        from_account: &str,
        to_account: &str,
        amount: Decimal,
        note: Option<&str>,
    ) -> CoreResult<TransferReceipt> {
        let transfer_id = Uuid::new_v4().to_string();

        let new_balance = self
            .ledger
            .debit(
                from_account,
                amount,
                JournalKind::TransferOut,
                Some(&transfer_id),
                note,
            )
            .await?;

        self.credit_or_compensate(&transfer_id, from_account, to_account, amount, note)
            .await?;

        let transfer = Transfer {
            id: transfer_id,
            from_account: from_account.to_string(),
            to_account: to_account.to_string(),
            amount,
            note: note.map(str::to_string),
            status: STATUS_COMPLETED.to_string(),
            created_at: Utc::now().timestamp(),
        };
        {
            let conn = self.storage.lock().await;
            transfer_store::insert_completed(&conn, &transfer)?;
        }

        Ok(TransferReceipt {
            transfer,
            new_balance,
        })
    }

    /// Credit leg of the compensating path. On failure, re-credit the sender
    /// so the pre-transfer balance is restored before the error surfaces;
    /// if the repair is exhausted too, escalate to `PartialFailure`.
    pub(crate) async fn credit_or_compensate(
        &self,
        transfer_id: &str,
        from_account: &str,
        to_account: &str,
        amount: Decimal,
        note: Option<&str>,
    ) -> CoreResult<()> {
        let credit_err = match self
            .ledger
            .credit(
                to_account,
                amount,
                JournalKind::TransferIn,
                Some(transfer_id),
                note,
            )
            .await
        {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };

        warn!(
            transfer = %transfer_id,
            from = %from_account,
            to = %to_account,
            amount = %amount,
            error = %credit_err,
            "credit leg failed after debit, compensating sender"
        );

        for attempt in 0..COMPENSATION_RETRIES {
            match self
                .ledger
                .credit(
                    from_account,
                    amount,
                    JournalKind::TransferRefund,
                    Some(transfer_id),
                    Some("credit leg failed, transfer reversed"),
                )
                .await
            {
                Ok(_) => return Err(credit_err),
                Err(comp_err) => {
                    warn!(
                        transfer = %transfer_id,
                        attempt,
                        error = %comp_err,
                        "compensation attempt failed"
                    );
                }
            }
        }

        error!(
            transfer = %transfer_id,
            account = %from_account,
            amount = %amount,
            "compensation exhausted: sender debited without matching credit, manual reconciliation required"
        );
        Err(CoreError::PartialFailure {
            transfer_id: transfer_id.to_string(),
            account_id: from_account.to_string(),
            amount,
        })
    }
}
