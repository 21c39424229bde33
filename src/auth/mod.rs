//! Authentication
//! Mission: Verify externally issued bearer tokens before the core sees an identity
//!
//! Token issuance belongs to the identity provider; this module only
//! validates signature and expiry and hands handlers a typed, trusted
//! `Claims`. Handlers never parse tokens themselves.

pub mod jwt;
pub mod middleware;
pub mod models;

pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use models::{Claims, UserRole};
