//! JWT Token Handler
//! Mission: Validate bearer tokens with the shared HS256 secret
//!
//! Issuance lives with the identity provider; `issue_token` exists for
//! local tooling and tests that need a valid credential.

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

use crate::auth::models::{Claims, UserRole};

pub struct JwtHandler {
    secret: String,
    expiration_hours: i64,
}

impl JwtHandler {
    pub fn new(secret: String) -> Self {
        Self {
            secret,
            expiration_hours: 24,
        }
    }

    /// Validate signature and expiry, returning the embedded claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .context("Invalid or expired token")?;

        debug!("Validated JWT for subject {}", decoded.claims.sub);

        Ok(decoded.claims)
    }

    /// Mint a token the way the identity provider would.
    pub fn issue_token(&self, sub: &str, role: UserRole) -> Result<String> {
        let expiration = Utc::now()
            .checked_add_signed(chrono::Duration::hours(self.expiration_hours))
            .context("Invalid timestamp")?
            .timestamp() as usize;

        let claims = Claims {
            sub: sub.to_string(),
            alias: None,
            role,
            exp: expiration,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("Failed to generate JWT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_validate_roundtrip() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());

        let token = handler.issue_token("user-1", UserRole::Trader).unwrap();
        assert!(!token.is_empty());

        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.role, UserRole::Trader);
        assert!(claims.exp > Utc::now().timestamp() as usize);
    }

    #[test]
    fn test_garbage_token_rejected() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        assert!(handler.validate_token("invalid.token.here").is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = JwtHandler::new("secret-one".to_string());
        let verifier = JwtHandler::new("secret-two".to_string());

        let token = issuer.issue_token("user-1", UserRole::Admin).unwrap();
        assert!(verifier.validate_token(&token).is_err());
    }
}
