//! Abundance API - user account service
//!
//! Registration with email verification, cookie or bearer sessions, password
//! changes and privileged user administration over HTTP.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod notify;
pub mod routes;
pub mod state;
pub mod validation;

use std::sync::Arc;

use abundance_core::config::ServerConfig;
use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers::health::{health_check, readiness_check};
use crate::middleware::{metrics_handler, metrics_middleware};
use crate::routes::ApiDoc;
use crate::state::AppState;

pub use crate::error::AppError;

/// Build the full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS for the web client: the public host plus configured extra origins
fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = std::iter::once(&server.public_host)
        .chain(server.cors_origins.iter())
        .map(|origin| origin.trim_end_matches('/'))
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true)
}

/// In-memory application for router tests
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use crate::auth::{CredentialHasher, PasswordConfig};
    use crate::middleware::ApiMetrics;
    use crate::notify::{MemoryMailer, NotificationQueue};
    use abundance_core::config::AppConfig;
    use abundance_core::{InMemoryUserStore, UserStore};

    /// Router plus handles on its collaborators
    pub struct TestApp {
        pub router: Router,
        pub state: Arc<AppState>,
        pub store: Arc<InMemoryUserStore>,
        pub mailer: Arc<MemoryMailer>,
    }

    /// Development defaults with a short resend window
    pub fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.server.public_host = "http://app.test".to_string();
        config.email.verify_url = "http://api.test/api/v1/user/verify/email".to_string();
        config.rate_limit.resend_limit = 1;
        config.rate_limit.resend_window_secs = 300;
        config
    }

    /// State over any directory, with cheap hashing and `mailer` behind the queue.
    /// Must run inside a tokio runtime.
    pub fn state_over(
        config: AppConfig,
        store: Arc<dyn UserStore>,
        mailer: Arc<MemoryMailer>,
    ) -> Arc<AppState> {
        let metrics = ApiMetrics::new().expect("metrics registry");
        let hasher =
            CredentialHasher::new(&PasswordConfig::minimal()).expect("minimal argon2 params");
        let (notifier, _worker) =
            NotificationQueue::spawn(mailer, config.email.queue_capacity, metrics.clone());

        Arc::new(AppState::new(config, store, hasher, notifier, metrics))
    }

    /// Build a [`TestApp`] from `config`. Must run inside a tokio runtime.
    pub fn test_app_with(config: AppConfig) -> TestApp {
        let store = Arc::new(InMemoryUserStore::new());
        let mailer = Arc::new(MemoryMailer::new());
        let state = state_over(config, store.clone(), mailer.clone());

        TestApp {
            router: create_router(state.clone()),
            state,
            store,
            mailer,
        }
    }

    pub fn test_app() -> TestApp {
        test_app_with(test_config())
    }
}

/// Router over an empty in-memory directory. Must run inside a tokio runtime.
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> Router {
    testing::test_app().router
}
