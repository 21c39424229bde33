//! HTTP API
//! Mission: Expose the settlement engine and transfer processor over axum

pub mod routes;

pub use routes::{create_router, AppState};
