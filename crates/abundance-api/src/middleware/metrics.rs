//! Prometheus metrics
//!
//! Registered metrics:
//! - `abundance_http_requests_total` counter (method, path, status)
//! - `abundance_http_request_duration_seconds` histogram (method, path)
//! - `abundance_account_events_total` counter (event)
//! - `abundance_resend_rate_limited_total` counter
//! - `abundance_notifications_total` counter (outcome)

use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;

/// Service metrics, owned by [`AppState`]
#[derive(Clone)]
pub struct ApiMetrics {
    pub registry: Arc<Registry>,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub account_events_total: IntCounterVec,
    pub resend_rate_limited_total: IntCounter,
    pub notifications_total: IntCounterVec,
}

impl ApiMetrics {
    /// Create all metrics in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("abundance_http_requests_total", "Total HTTP requests"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "abundance_http_request_duration_seconds",
                "HTTP response time in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
            &["method", "path"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let account_events_total = IntCounterVec::new(
            Opts::new(
                "abundance_account_events_total",
                "Account lifecycle events by kind",
            ),
            &["event"],
        )?;
        registry.register(Box::new(account_events_total.clone()))?;

        let resend_rate_limited_total = IntCounter::with_opts(Opts::new(
            "abundance_resend_rate_limited_total",
            "Verification resend requests rejected by the rate limiter",
        ))?;
        registry.register(Box::new(resend_rate_limited_total.clone()))?;

        let notifications_total = IntCounterVec::new(
            Opts::new(
                "abundance_notifications_total",
                "Verification emails by delivery outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(notifications_total.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry: Arc::new(registry),
            http_requests_total,
            http_request_duration_seconds,
            account_events_total,
            resend_rate_limited_total,
            notifications_total,
        })
    }

    /// Count an account event such as `registered` or `login`
    pub fn record_event(&self, event: &str) {
        self.account_events_total.with_label_values(&[event]).inc();
    }

    pub fn record_rate_limited(&self) {
        self.resend_rate_limited_total.inc();
    }

    /// Count a notification outcome: `sent`, `failed` or `dropped`
    pub fn record_notification(&self, outcome: &str) {
        self.notifications_total.with_label_values(&[outcome]).inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Record request count and latency per route
pub async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    // Route template keeps label cardinality bounded
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| normalize_endpoint(request.uri().path()));

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    state
        .metrics
        .http_requests_total
        .with_label_values(&[&method, &path, &status])
        .inc();
    state
        .metrics
        .http_request_duration_seconds
        .with_label_values(&[&method, &path])
        .observe(start.elapsed().as_secs_f64());

    response
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.export() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("metrics export failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Replace numeric id segments with `:id`
fn normalize_endpoint(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if !seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit()) {
                ":id"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
