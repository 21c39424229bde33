//! Shared Models & Configuration
//! Mission: Typed runtime configuration and settlement policy

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Settlement and transfer policy knobs.
///
/// All monetary values are decimals; never floats.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Smallest stake accepted for a trade session.
    pub min_stake: Decimal,
    /// Profit fraction of the stake paid on a WON session.
    pub payout_ratio: Decimal,
    /// Balance granted when an account is provisioned.
    pub starting_balance: Decimal,
    /// Accepted session window, in seconds.
    pub min_duration_secs: i64,
    pub max_duration_secs: i64,
    /// Reference price nudge applied on an admin override, in percent.
    pub price_nudge_pct: f64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            min_stake: dec!(50),
            payout_ratio: dec!(0.8),
            starting_balance: dec!(10000),
            min_duration_secs: 30,
            max_duration_secs: 86_400,
            price_nudge_pct: 0.5,
        }
    }
}

/// Server configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub policy: Policy,
    /// Single-transaction transfer path when true; compensating two-leg
    /// fallback when false.
    pub transfer_atomic: bool,
    /// Per-IP request budget per minute. Zero disables rate limiting.
    pub rate_limit_rpm: u32,
    pub metrics_enabled: bool,
    pub metrics_addr: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "binbroker.db".to_string());

        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let jwt_secret = std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| "dev-secret-change-in-production-minimum-32-characters".to_string());

        let transfer_atomic = std::env::var("TRANSFER_ATOMIC")
            .map(|v| !matches!(v.as_str(), "0" | "false" | "FALSE" | "off" | "OFF"))
            .unwrap_or(true);

        let rate_limit_rpm = std::env::var("RATE_LIMIT_RPM")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(300);

        let metrics_enabled = std::env::var("METRICS_ENABLED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(false);

        let metrics_addr =
            std::env::var("METRICS_ADDR").unwrap_or_else(|_| "0.0.0.0:9100".to_string());

        let defaults = Policy::default();
        let policy = Policy {
            min_stake: decimal_env("MIN_STAKE", defaults.min_stake),
            payout_ratio: decimal_env("PAYOUT_RATIO", defaults.payout_ratio),
            starting_balance: decimal_env("STARTING_BALANCE", defaults.starting_balance),
            min_duration_secs: int_env("MIN_DURATION_SECS", defaults.min_duration_secs),
            max_duration_secs: int_env("MAX_DURATION_SECS", defaults.max_duration_secs),
            price_nudge_pct: std::env::var("PRICE_NUDGE_PCT")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(defaults.price_nudge_pct),
        };

        Self {
            database_path,
            bind_addr,
            jwt_secret,
            policy,
            transfer_atomic,
            rate_limit_rpm,
            metrics_enabled,
            metrics_addr,
        }
    }
}

fn decimal_env(key: &str, default: Decimal) -> Decimal {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<Decimal>().ok())
        .unwrap_or(default)
}

fn int_env(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_values() {
        let policy = Policy::default();
        assert_eq!(policy.min_stake, dec!(50));
        assert_eq!(policy.payout_ratio, dec!(0.8));
        assert_eq!(policy.starting_balance, dec!(10000));
        assert!(policy.min_duration_secs < policy.max_duration_secs);
    }

    #[test]
    fn test_payout_arithmetic_is_exact() {
        let policy = Policy::default();
        let stake = dec!(100);
        let payout = stake + stake * policy.payout_ratio;
        assert_eq!(payout, dec!(180));
    }
}
