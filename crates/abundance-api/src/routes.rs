//! API route definitions

use crate::auth::rate_limit::resend_rate_limit;
use crate::auth::{block_if_authenticated, require_session};
use crate::handlers::{auth, health, users, verify};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

/// OpenAPI document served at `/api-docs/openapi.json`
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Abundance Accounts API",
        description = "Registration, email verification, sessions and user administration"
    ),
    paths(
        health::health_check,
        health::readiness_check,
        auth::login_handler,
        auth::logout_handler,
        auth::status_handler,
        users::register_handler,
        users::super_user_handler,
        users::list_users_handler,
        users::get_user_handler,
        users::delete_user_handler,
        users::promote_user_handler,
        users::demote_user_handler,
        users::update_subscription_handler,
        users::update_password_handler,
        verify::verify_email_handler,
        verify::resend_verification_handler,
    ),
    components(schemas(
        crate::error::ApiError,
        crate::handlers::MessageResponse,
        health::HealthResponse,
        health::ReadinessResponse,
        auth::LoginRequest,
        auth::LoginResponse,
        auth::StatusResponse,
        users::RegisterRequest,
        users::RegisterResponse,
        users::UpdatePasswordRequest,
        users::SubscriptionRequest,
        verify::ResendVerificationRequest,
        abundance_core::User,
        abundance_core::Role,
        abundance_core::SubscriptionStatus,
    )),
    modifiers(&SessionSecurity),
    tags(
        (name = "health", description = "Liveness and readiness"),
        (name = "auth", description = "Login, logout and session status"),
        (name = "users", description = "Registration and user administration"),
        (name = "verification", description = "Email verification"),
    )
)]
pub struct ApiDoc;

struct SessionSecurity;

impl Modify for SessionSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session_cookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(
                    crate::auth::SESSION_COOKIE,
                ))),
            );
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create API v1 routes
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/user/auth/logout", post(auth::logout_handler))
        .route("/user/register", post(users::register_handler))
        .route("/user/super-user", patch(users::super_user_handler))
        .route("/user/verify/email", get(verify::verify_email_handler));

    // Login is refused while a valid session is presented
    let login_routes = Router::new()
        .route("/user/auth/login", post(auth::login_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            block_if_authenticated,
        ));

    let resend_routes = Router::new()
        .route(
            "/user/verify/email/resend",
            post(verify::resend_verification_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            resend_rate_limit,
        ));

    // Protected routes (session required; privilege is checked per handler)
    let protected_routes = Router::new()
        .route("/user/auth/status", get(auth::status_handler))
        .route("/user/password", patch(users::update_password_handler))
        .route("/users", get(users::list_users_handler))
        .route(
            "/user/:id",
            get(users::get_user_handler).delete(users::delete_user_handler),
        )
        .route("/user/:id/promote", patch(users::promote_user_handler))
        .route("/user/:id/demote", patch(users::demote_user_handler))
        .route(
            "/user/:id/subscription",
            patch(users::update_subscription_handler),
        )
        .route_layer(middleware::from_fn_with_state(state, require_session));

    Router::new()
        .merge(public_routes)
        .merge(login_routes)
        .merge(resend_routes)
        .merge(protected_routes)
}
