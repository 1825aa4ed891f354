//! Session handlers: login, logout and session status

use crate::audit::{audit_log, extract_ip_address, AuditEvent};
use crate::auth::middleware::{expired_session_cookie, session_cookie, session_token};
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::handlers::MessageResponse;
use crate::state::AppState;
use crate::validation::{normalize_email, validate_required, ValidatedJson};
use abundance_core::{CoreError, User};
use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

/// Login request body
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(default)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(custom(function = "validate_required"))]
    pub password: String,
}

/// Login response body; the token is also set as the `token` cookie
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    /// Session lifetime in seconds
    pub expires_in: String,
}

/// Session status response
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub user: User,
}

fn login_failure(email: &str, reason: &str, ip_address: Option<String>, message: &str) -> AppError {
    audit_log(&AuditEvent::LoginFailure {
        email: email.to_string(),
        reason: reason.to_string(),
        ip_address,
    });
    AppError::BadRequest(message.to_string())
}

/// Login with email and password
///
/// Only verified accounts may log in. Rejected while the caller already holds
/// a valid session.
#[utoipa::path(
    post,
    path = "/api/v1/user/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Invalid credentials or unverified account", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> Result<Response, AppError> {
    let ip_address = extract_ip_address(&headers);
    let email = normalize_email(&request.email);

    let user = match state.store.get_user_by_email(&email).await {
        Ok(user) => user,
        Err(CoreError::NotFound(_)) => {
            return Err(login_failure(
                &email,
                "unknown_account",
                ip_address,
                "You don't have an account. Please register",
            ))
        }
        Err(e) => return Err(e.into()),
    };

    if !state
        .hasher
        .verify_blocking(request.password, user.password_hash.clone())
        .await
    {
        return Err(login_failure(
            &user.email,
            "bad_password",
            ip_address,
            "Email or password is incorrect",
        ));
    }

    if !user.is_verified {
        return Err(login_failure(
            &user.email,
            "unverified",
            ip_address,
            "Please verify your email",
        ));
    }

    let token = state
        .tokens
        .issue_session(user.id)
        .map_err(|e| AppError::Internal(format!("Error signing session token: {e}")))?;
    let lifetime = state.tokens.session_lifetime_secs();
    let cookie = session_cookie(&token, lifetime, state.secure_cookies())?;

    audit_log(&AuditEvent::LoginSuccess {
        user_id: user.id,
        email: user.email,
        ip_address,
    });
    state.metrics.record_event("login");

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            token,
            expires_in: lifetime.to_string(),
        }),
    )
        .into_response())
}

/// Clear the session cookie
///
/// Sessions are stateless; this only expires the cookie on the client.
#[utoipa::path(
    post,
    path = "/api/v1/user/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logout successful", body = MessageResponse),
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user_id = session_token(&headers).and_then(|t| state.tokens.validate_session(&t).ok());
    audit_log(&AuditEvent::Logout {
        user_id,
        ip_address: extract_ip_address(&headers),
    });

    (
        [(header::SET_COOKIE, expired_session_cookie(state.secure_cookies()))],
        Json(MessageResponse::new("Logged out successfully")),
    )
}

/// Return the account behind the current session
#[utoipa::path(
    get,
    path = "/api/v1/user/auth/status",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = StatusResponse),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiError),
    ),
    security(
        ("session_cookie" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
) -> Result<Json<StatusResponse>, AppError> {
    let user = state
        .store
        .get_user_by_id(caller.user_id)
        .await
        .map_err(|e| match e {
            CoreError::NotFound(_) => AppError::Unauthorized("Token is invalid".to_string()),
            other => other.into(),
        })?;

    Ok(Json(StatusResponse { user }))
}
