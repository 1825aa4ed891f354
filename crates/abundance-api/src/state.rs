//! Application state management

use abundance_core::config::AppConfig;
use abundance_core::UserStore;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::{AccessControl, CredentialHasher, FixedWindowRateLimiter, TokenService};
use crate::middleware::ApiMetrics;
use crate::notify::NotificationQueue;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// User directory
    pub store: Arc<dyn UserStore>,
    /// Session and verification tokens
    pub tokens: TokenService,
    pub hasher: CredentialHasher,
    pub access: AccessControl,
    /// Outbound verification emails
    pub notifier: NotificationQueue,
    /// Throttle for the verification resend endpoint
    pub resend_limiter: Arc<FixedWindowRateLimiter>,
    pub metrics: ApiMetrics,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn UserStore>,
        hasher: CredentialHasher,
        notifier: NotificationQueue,
        metrics: ApiMetrics,
    ) -> Self {
        let resend_limiter = Arc::new(FixedWindowRateLimiter::new(
            config.rate_limit.resend_limit,
            Duration::from_secs(config.rate_limit.resend_window_secs),
        ));

        Self {
            tokens: TokenService::new(&config.auth),
            access: AccessControl::new(Arc::clone(&store)),
            config,
            store,
            hasher,
            notifier,
            resend_limiter,
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Whether cookies should carry the `Secure` attribute
    pub fn secure_cookies(&self) -> bool {
        self.config.server.production
    }
}
