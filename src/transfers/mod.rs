//! Peer Credit Transfers
//! Mission: Move balance between two accounts without ever losing a cent
//!
//! `store` persists the transfer records, `processor` performs the two-sided
//! ledger mutation, atomically by default and with a compensating two-leg
//! fallback when the atomic path is disabled.

pub mod processor;
pub mod store;

pub use processor::{ReceiverRef, TransferProcessor, TransferReceipt, TransferRequest};
pub use store::{Transfer, TransferStore};
