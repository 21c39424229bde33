//! Settlement Engine
//! Mission: Reserve stakes on entry and settle every session exactly once
//!
//! Creation debits the stake before the session row exists and refunds it
//! if the insert fails. Resolution flips the status, credits any payout,
//! and appends the journal rows inside one transaction, so a session can
//! never be half-settled.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::ledger::store as ledger_store;
use crate::ledger::{JournalKind, LedgerStore};
use crate::market::{NudgeDirection, PriceBoard};
use crate::models::Policy;
use crate::notify::{NotificationEvent, Notifier};
use crate::storage::Storage;

use super::store::{self as session_store, OutcomeSource, SessionStatus, SessionStore, TradeSession};

/// Terminal outcome requested by a resolver. PENDING is not representable
/// here, so a resolution call can only move a session forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionOutcome {
    Win,
    Loss,
}

impl SessionOutcome {
    pub fn status(self) -> SessionStatus {
        match self {
            SessionOutcome::Win => SessionStatus::Won,
            SessionOutcome::Loss => SessionStatus::Lost,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSessionRequest {
    pub symbol: String,
    pub amount: Decimal,
    pub duration_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReceipt {
    pub session: TradeSession,
    pub new_balance: Decimal,
}

#[derive(Clone)]
pub struct SettlementEngine {
    storage: Storage,
    ledger: LedgerStore,
    sessions: SessionStore,
    prices: PriceBoard,
    notifier: Notifier,
    policy: Policy,
}

impl SettlementEngine {
    pub fn new(
        storage: Storage,
        ledger: LedgerStore,
        sessions: SessionStore,
        prices: PriceBoard,
        notifier: Notifier,
        policy: Policy,
    ) -> Self {
        Self {
            storage,
            ledger,
            sessions,
            prices,
            notifier,
            policy,
        }
    }

    /// Open a PENDING session, reserving the stake up front.
    pub async fn create_session(
        &self,
        account_id: &str,
        req: NewSessionRequest,
    ) -> CoreResult<SessionReceipt> {
        self.create_session_with_id(account_id, req, Uuid::new_v4().to_string())
            .await
    }

    pub(crate) async fn create_session_with_id(
        &self,
        account_id: &str,
        req: NewSessionRequest,
        session_id: String,
    ) -> CoreResult<SessionReceipt> {
        let symbol = req.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(CoreError::Validation(
                "instrument symbol must not be empty".to_string(),
            ));
        }

        let stake = req.amount;
        if stake <= Decimal::ZERO {
            return Err(CoreError::Validation(
                "stake must be a positive amount".to_string(),
            ));
        }
        if stake.normalize().scale() > 2 {
            return Err(CoreError::Validation(
                "stake precision is limited to 2 decimal places".to_string(),
            ));
        }
        if stake < self.policy.min_stake {
            return Err(CoreError::Validation(format!(
                "stake {} is below the minimum of {}",
                stake, self.policy.min_stake
            )));
        }
        if req.duration_secs < self.policy.min_duration_secs
            || req.duration_secs > self.policy.max_duration_secs
        {
            return Err(CoreError::Validation(format!(
                "duration must be between {} and {} seconds",
                self.policy.min_duration_secs, self.policy.max_duration_secs
            )));
        }

        // Reserve the stake before the session exists. The refund below is
        // the only thing standing between a failed insert and lost funds.
        let new_balance = self
            .ledger
            .debit(
                account_id,
                stake,
                JournalKind::TradeStake,
                Some(&session_id),
                Some(&symbol),
            )
            .await?;

        let session = TradeSession {
            id: session_id,
            account_id: account_id.to_string(),
            symbol,
            stake,
            duration_secs: req.duration_secs,
            status: SessionStatus::Pending,
            outcome_source: None,
            created_at: Utc::now().timestamp(),
            resolved_at: None,
        };

        if let Err(insert_err) = self.sessions.insert(&session).await {
            if let Err(refund_err) = self
                .ledger
                .credit(
                    account_id,
                    stake,
                    JournalKind::StakeRefund,
                    Some(&session.id),
                    None,
                )
                .await
            {
                error!(
                    account = %account_id,
                    session = %session.id,
                    stake = %stake,
                    error = %refund_err,
                    "stake refund after failed session insert also failed; ledger requires reconciliation"
                );
            }
            return Err(insert_err);
        }

        metrics::counter!("binbroker_sessions_created_total", 1);
        info!(
            session = %session.id,
            account = %account_id,
            symbol = %session.symbol,
            stake = %stake,
            duration_secs = session.duration_secs,
            "📈 Trade session opened"
        );
        self.notifier.emit(NotificationEvent::SessionOpened {
            session_id: session.id.clone(),
            account_id: account_id.to_string(),
            symbol: session.symbol.clone(),
            stake,
        });

        Ok(SessionReceipt {
            session,
            new_balance,
        })
    }

    /// Finalize a PENDING session. Exactly one resolver wins; everyone else
    /// gets `Conflict`. Status flip, payout, and journal rows commit
    /// together.
    pub async fn resolve_session(
        &self,
        session_id: &str,
        outcome: SessionOutcome,
        source: OutcomeSource,
    ) -> CoreResult<TradeSession> {
        let status = outcome.status();

        let (resolved, payout) = {
            let mut conn = self.storage.lock().await;
            let tx = conn.transaction()?;

            let Some(session) = session_store::read_session(&tx, session_id)? else {
                return Err(CoreError::NotFound(format!("session {session_id}")));
            };

            let now = Utc::now().timestamp();
            if !session_store::mark_resolved(&tx, session_id, status, source, now)? {
                return Err(CoreError::Conflict(format!(
                    "session {session_id} is already finalized"
                )));
            }

            let payout = match outcome {
                SessionOutcome::Win => {
                    let payout = session.stake + session.stake * self.policy.payout_ratio;
                    let Some((balance, raw)) =
                        ledger_store::read_balance(&tx, &session.account_id)?
                    else {
                        return Err(CoreError::NotFound(format!(
                            "account {}",
                            session.account_id
                        )));
                    };
                    ledger_store::write_balance(
                        &tx,
                        &session.account_id,
                        &raw,
                        balance + payout,
                        now,
                    )?;
                    ledger_store::append_journal(
                        &tx,
                        &session.account_id,
                        JournalKind::TradePayout,
                        payout,
                        Some(session_id),
                        None,
                        now,
                    )?;
                    payout
                }
                SessionOutcome::Loss => {
                    // Zero-amount marker so lost sessions still leave an
                    // audit row.
                    ledger_store::append_journal(
                        &tx,
                        &session.account_id,
                        JournalKind::TradeLoss,
                        Decimal::ZERO,
                        Some(session_id),
                        None,
                        now,
                    )?;
                    Decimal::ZERO
                }
            };

            tx.commit()?;

            (
                TradeSession {
                    status,
                    outcome_source: Some(source),
                    resolved_at: Some(now),
                    ..session
                },
                payout,
            )
        };

        metrics::counter!(
            "binbroker_sessions_resolved_total",
            1,
            "status" => status.as_str()
        );
        info!(
            session = %resolved.id,
            account = %resolved.account_id,
            status = status.as_str(),
            source = source.as_str(),
            payout = %payout,
            "🎲 Trade session settled"
        );
        self.notifier.emit(NotificationEvent::SessionSettled {
            session_id: resolved.id.clone(),
            account_id: resolved.account_id.clone(),
            status,
            payout,
        });

        Ok(resolved)
    }

    /// Administrator override: settle any PENDING session at will, then
    /// nudge the instrument's reference price to agree with the outcome.
    /// The nudge is cosmetic and cannot fail the settlement.
    pub async fn admin_resolve(
        &self,
        session_id: &str,
        outcome: SessionOutcome,
    ) -> CoreResult<(TradeSession, f64)> {
        let session = self
            .resolve_session(session_id, outcome, OutcomeSource::AdminOverride)
            .await?;

        let direction = match outcome {
            SessionOutcome::Win => NudgeDirection::Up,
            SessionOutcome::Loss => NudgeDirection::Down,
        };
        let new_price = self.prices.nudge(&session.symbol, direction);

        Ok((session, new_price))
    }
}
