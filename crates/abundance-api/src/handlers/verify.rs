//! Email verification handlers
//!
//! A verification token is redeemable until it expires. Redeeming it for an
//! account that is already verified is rejected and changes nothing.

use crate::audit::{audit_log, extract_ip_address, AuditEvent};
use crate::error::AppError;
use crate::handlers::{dispatch_verification, MessageResponse};
use crate::state::AppState;
use crate::validation::{normalize_email, ValidatedJson};
use abundance_core::CoreError;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Query string of the verification link
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VerifyEmailQuery {
    /// Verification token from the email
    pub token: Option<String>,
}

/// Resend request body
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(default)]
pub struct ResendVerificationRequest {
    #[validate(email)]
    pub email: String,
}

/// Redeem a verification token and redirect to the web app
#[utoipa::path(
    get,
    path = "/api/v1/user/verify/email",
    tag = "verification",
    params(VerifyEmailQuery),
    responses(
        (status = 303, description = "Verified, redirecting to the public host"),
        (status = 400, description = "Missing, invalid or already redeemed token", body = crate::error::ApiError),
    )
)]
pub async fn verify_email_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<Response, AppError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("Token is missing".to_string()))?;

    let email = state.tokens.validate_verification(&token).map_err(|e| {
        audit_log(&AuditEvent::VerificationFailure {
            reason: e.kind().to_string(),
            ip_address: extract_ip_address(&headers),
        });
        AppError::BadRequest(format!("Error validating verification token: {e}"))
    })?;

    let user = state
        .store
        .get_user_by_email(&email)
        .await
        .map_err(|e| match e {
            CoreError::NotFound(_) => {
                AppError::BadRequest(format!("Error getting user by email: {e}"))
            }
            other => other.into(),
        })?;

    // The flag is checked and set in one statement; a concurrent redemption
    // that loses the race sees `false` here.
    if !state.store.mark_verified(user.id).await? {
        return Err(AppError::BadRequest("User is already verified".to_string()));
    }

    audit_log(&AuditEvent::EmailVerified {
        user_id: user.id,
        email: user.email,
    });
    state.metrics.record_event("verified");

    let target = format!("{}/", state.config.server.public_host.trim_end_matches('/'));
    Ok(Redirect::to(&target).into_response())
}

/// Issue a new verification token and email it
///
/// Throttled per email address; see `auth::rate_limit`.
#[utoipa::path(
    post,
    path = "/api/v1/user/verify/email/resend",
    tag = "verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 200, description = "Verification email queued", body = MessageResponse),
        (status = 400, description = "Unknown or already verified account", body = crate::error::ApiError),
        (status = 429, description = "Resent too recently", body = crate::error::ApiError),
    )
)]
pub async fn resend_verification_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<ResendVerificationRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let email = normalize_email(&request.email);
    let user = state
        .store
        .get_user_by_email(&email)
        .await
        .map_err(|e| match e {
            CoreError::NotFound(_) => AppError::BadRequest(format!(
                "User with email {} does not exist",
                request.email
            )),
            other => other.into(),
        })?;

    if user.is_verified {
        return Err(AppError::BadRequest(format!(
            "User with email {} is already verified",
            request.email
        )));
    }

    dispatch_verification(&state, &user.email)?;

    audit_log(&AuditEvent::VerificationResent {
        email: user.email,
        ip_address: extract_ip_address(&headers),
    });

    Ok(Json(MessageResponse::new("Verification email sent")))
}
