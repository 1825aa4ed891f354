//! Abundance API Server
//!
//! REST API server for Abundance user accounts.

use abundance_api::{
    auth::{CredentialHasher, PasswordConfig},
    create_router,
    middleware::ApiMetrics,
    notify::{mailer_from_config, NotificationQueue},
    state::AppState,
};
use abundance_core::config::{AppConfig, LoggingConfig};
use abundance_core::PgUserStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration: optional TOML file, environment on top
    let config = match std::env::var("ABUNDANCE_CONFIG") {
        Ok(path) => AppConfig::from_file(path)?.with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };

    init_tracing(&config.logging);

    // User directory
    let store = PgUserStore::connect(&config.database.url, config.database.max_connections).await?;
    store.migrate().await?;
    tracing::info!("Database migrations applied");

    let metrics = ApiMetrics::new()?;
    let hasher = CredentialHasher::new(&PasswordConfig::default())?;

    // Verification emails are delivered by a single background worker
    let mailer = mailer_from_config(&config.email)?;
    let (notifier, _worker) =
        NotificationQueue::spawn(mailer, config.email.queue_capacity, metrics.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Create application state
    let state = Arc::new(AppState::new(
        config,
        Arc::new(store),
        hasher,
        notifier,
        metrics,
    ));
    state.resend_limiter.spawn_cleanup();

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Abundance API Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "abundance_api={level},abundance_core={level},audit=info,tower_http=debug",
            level = logging.level
        )
        .into()
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
