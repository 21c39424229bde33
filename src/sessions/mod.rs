//! Trade Sessions
//! Mission: Time-boxed trades, settled exactly once
//!
//! `store` persists the session rows, `engine` owns every state transition
//! and its ledger effect, `sweeper` finalizes sessions whose window elapsed
//! with no explicit outcome.

pub mod engine;
pub mod store;
pub mod sweeper;

pub use engine::{NewSessionRequest, SessionOutcome, SessionReceipt, SettlementEngine};
pub use store::{OutcomeSource, SessionStatus, SessionStore, TradeSession};
pub use sweeper::ExpirySweeper;
