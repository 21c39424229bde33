//! Authentication Models
//! Mission: Typed identity claims shared with the identity provider

use serde::{Deserialize, Serialize};

/// Roles encoded in the bearer token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "trader")]
    Trader,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Trader => "trader",
        }
    }
}

/// JWT claims payload. `sub` is the account identity everywhere in the
/// core; it is trusted only because the middleware verified the token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    /// Public transfer alias, when the identity provider includes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub role: UserRole,
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}
