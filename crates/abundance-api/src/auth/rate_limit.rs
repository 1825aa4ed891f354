//! Fixed-window rate limiting
//!
//! Each key gets its own window of `window` length starting at its first hit.
//! Up to `limit` hits are allowed per window; the next hit after the window
//! has elapsed opens a fresh one for that key only. State is process-local.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;

use crate::audit::{audit_log, extract_ip_address, AuditEvent};
use crate::error::AppError;
use crate::state::AppState;
use crate::validation::normalize_email;

/// Response body for a throttled resend request
pub const RESEND_LIMIT_MESSAGE: &str =
    "We have sent you a verification email. Please check your inbox and spam folder.";

/// Largest body the resend limiter will buffer to find the email
const MAX_INSPECTED_BODY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Per-key fixed-window counter
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<String, Window>,
}

impl FixedWindowRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
        }
    }

    /// Record a hit for `key`; `false` means the key is over its limit
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// Same as [`allow`](Self::allow) with an explicit clock
    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        // The entry guard holds the shard lock, so check and increment are atomic per key
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.saturating_duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Drop windows that have fully elapsed
    pub fn purge_expired(&self) {
        self.purge_expired_at(Instant::now());
    }

    pub fn purge_expired_at(&self, now: Instant) {
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Purge stale windows once per window length until the runtime shuts down
    pub fn spawn_cleanup(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.window.max(Duration::from_secs(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.purge_expired();
                tracing::trace!(keys = limiter.tracked_keys(), "purged rate limit windows");
            }
        })
    }
}

/// Throttle verification-email resends per email address
///
/// The key is the normalized `email` field of the JSON body, or the client IP
/// when the body has none. The body is passed through unchanged.
pub async fn resend_rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_INSPECTED_BODY)
        .await
        .map_err(|_| AppError::InvalidPayload)?;

    let email = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|v| v.get("email").and_then(|e| e.as_str()).map(normalize_email))
        .filter(|e| !e.is_empty());

    let key = match email {
        Some(email) => format!("email:{email}"),
        None => format!(
            "ip:{}",
            extract_ip_address(&parts.headers).unwrap_or_else(|| "unknown".to_string())
        ),
    };

    if !state.resend_limiter.allow(&key) {
        state.metrics.record_rate_limited();
        audit_log(&AuditEvent::RateLimited {
            key,
            resource: parts.uri.path().to_string(),
        });
        return Err(AppError::TooManyRequests(RESEND_LIMIT_MESSAGE.to_string()));
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_within_window() {
        let limiter = FixedWindowRateLimiter::new(2, Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(limiter.allow_at("a", t0));
        assert!(limiter.allow_at("a", t0 + Duration::from_secs(1)));
        assert!(!limiter.allow_at("a", t0 + Duration::from_secs(2)));
    }

    #[test]
    fn test_window_resets_after_elapsed() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::from_secs(300));
        let t0 = Instant::now();

        assert!(limiter.allow_at("a", t0));
        assert!(!limiter.allow_at("a", t0 + Duration::from_secs(299)));
        assert!(limiter.allow_at("a", t0 + Duration::from_secs(300)));
        assert!(!limiter.allow_at("a", t0 + Duration::from_secs(301)));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(limiter.allow_at("a", t0));
        assert!(limiter.allow_at("b", t0));
        assert!(!limiter.allow_at("a", t0));
        assert!(!limiter.allow_at("b", t0));
    }

    #[test]
    fn test_purge_drops_only_elapsed_windows() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::from_secs(10));
        let t0 = Instant::now();

        limiter.allow_at("old", t0);
        limiter.allow_at("new", t0 + Duration::from_secs(8));
        limiter.purge_expired_at(t0 + Duration::from_secs(12));

        assert_eq!(limiter.tracked_keys(), 1);
        assert!(!limiter.allow_at("new", t0 + Duration::from_secs(12)));
    }

    #[test]
    fn test_concurrent_hits_respect_limit() {
        let limiter = Arc::new(FixedWindowRateLimiter::new(5, Duration::from_secs(60)));
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.allow("shared"))
            })
            .collect();

        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(allowed, 5);
    }
}
