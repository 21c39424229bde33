//! Domain Errors
//! Mission: One typed error surface for every ledger and settlement operation

use rust_decimal::Decimal;

pub type CoreResult<T> = Result<T, CoreError>;

/// Errors produced by the ledger, settlement engine, and transfer processor.
///
/// The HTTP layer maps these onto status codes; auth failures (401/403) are
/// raised before any of these paths run.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// A state transition lost to a racing resolver or a contended write.
    #[error("{0}")]
    Conflict(String),

    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    #[error("cannot transfer funds to your own account")]
    SelfTransfer,

    #[error("transfer receiver {0} not found")]
    ReceiverNotFound(String),

    /// The compensating transfer path debited the sender and could not
    /// repair itself. Requires manual reconciliation.
    #[error(
        "transfer {transfer_id} left account {account_id} debited by {amount} without a matching credit"
    )]
    PartialFailure {
        transfer_id: String,
        account_id: String,
        amount: Decimal,
    },

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Storage(err.into())
    }
}
