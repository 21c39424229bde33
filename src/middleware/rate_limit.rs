//! Rate limiting middleware.
//!
//! In-memory fixed-window counter per client IP. Generous by default; the
//! session-list poll every few seconds is the expected traffic shape.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct RateLimiter {
    /// Requests allowed per window per IP. Zero disables limiting.
    max_per_minute: u32,
    windows: Arc<Mutex<HashMap<IpAddr, Window>>>,
}

struct Window {
    count: u32,
    started: Instant,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one request from `ip`. Returns seconds until the window resets
    /// when the budget is exhausted.
    fn check(&self, ip: IpAddr) -> Result<(), u64> {
        if self.max_per_minute == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(ip).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.duration_since(window.started) >= WINDOW {
            window.count = 0;
            window.started = now;
        }

        window.count += 1;
        if window.count > self.max_per_minute {
            let reset = WINDOW.saturating_sub(now.duration_since(window.started));
            Err(reset.as_secs().max(1))
        } else {
            Ok(())
        }
    }

    /// Drop windows that have been idle for two full periods.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.windows
            .lock()
            .retain(|_, w| now.duration_since(w.started) < WINDOW * 2);
    }
}

pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match limiter.check(addr.ip()) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!(ip = %addr.ip(), retry_after, "Rate limit exceeded");

            let body = serde_json::json!({
                "error": "rate_limit_exceeded",
                "retry_after_seconds": retry_after,
            });
            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after.to_string())],
                axum::Json(body),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_within_budget_pass() {
        let limiter = RateLimiter::new(5);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        for _ in 0..5 {
            assert!(limiter.check(ip).is_ok());
        }
        assert!(limiter.check(ip).is_err());
    }

    #[test]
    fn test_budgets_are_per_ip() {
        let limiter = RateLimiter::new(1);
        let first: IpAddr = "10.0.0.1".parse().unwrap();
        let second: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(first).is_ok());
        assert!(limiter.check(first).is_err());
        assert!(limiter.check(second).is_ok());
    }

    #[test]
    fn test_zero_budget_disables_limiting() {
        let limiter = RateLimiter::new(0);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        for _ in 0..1000 {
            assert!(limiter.check(ip).is_ok());
        }
    }
}
