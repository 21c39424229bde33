//! Expiry Sweeper
//! Mission: Finalize elapsed sessions the moment anyone looks
//!
//! There is no background scheduler. The sweep runs inside the owner's
//! session-list read, so a session whose window has elapsed is LOST by the
//! time the client sees it. Racing against an admin override is expected:
//! the conditional status flip in the engine lets exactly one resolver win,
//! and the sweep treats losing that race as success.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};

use super::engine::{SessionOutcome, SettlementEngine};
use super::store::{OutcomeSource, SessionStore};

#[derive(Clone)]
pub struct ExpirySweeper {
    sessions: SessionStore,
    engine: SettlementEngine,
}

impl ExpirySweeper {
    pub fn new(sessions: SessionStore, engine: SettlementEngine) -> Self {
        Self { sessions, engine }
    }

    /// Force-resolve every elapsed PENDING session owned by `account_id` to
    /// LOST. Returns how many sessions this particular sweep finalized.
    ///
    /// Conflicts from racing resolvers are swallowed; any other resolution
    /// failure is logged and skipped so the read that triggered the sweep
    /// still succeeds.
    pub async fn sweep_account(&self, account_id: &str) -> CoreResult<usize> {
        let now = Utc::now().timestamp();
        let expired = self.sessions.list_expired_pending(account_id, now).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut swept = 0;
        for session_id in &expired {
            match self
                .engine
                .resolve_session(session_id, SessionOutcome::Loss, OutcomeSource::AutoExpiry)
                .await
            {
                Ok(_) => swept += 1,
                Err(CoreError::Conflict(_)) => {
                    // Another resolver finalized it between the listing and
                    // this call. Same end state, nothing to do.
                    debug!(session = %session_id, "expiry sweep lost resolution race");
                }
                Err(err) => {
                    warn!(
                        session = %session_id,
                        account = %account_id,
                        error = %err,
                        "expiry sweep failed to resolve session"
                    );
                }
            }
        }

        if swept > 0 {
            info!(account = %account_id, swept, "🧹 Expired trade sessions swept to LOST");
        }
        Ok(swept)
    }
}
