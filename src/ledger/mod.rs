//! Balance Ledger
//! Mission: Single source of truth for account funds and their audit trail

pub mod store;

pub use store::{Account, JournalEntry, JournalKind, LedgerStore};
