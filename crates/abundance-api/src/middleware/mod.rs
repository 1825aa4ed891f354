//! Cross-cutting HTTP middleware

pub mod metrics;

pub use metrics::{metrics_handler, metrics_middleware, ApiMetrics};
