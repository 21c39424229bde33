//! BinBroker backend library.
//!
//! Trade session settlement engine and the balance ledger it shares with
//! peer credit transfers, plus the HTTP surface that exposes them.

pub mod api;
pub mod auth;
pub mod error;
pub mod ledger;
pub mod market;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod sessions;
pub mod storage;
pub mod transfers;
