//! API handlers

pub mod auth;
pub mod health;
pub mod users;
pub mod verify;

use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::notify::VerificationEmail;
use crate::state::AppState;

/// Plain `{"message": ..}` response body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Issue a verification token for `email` and queue the email
///
/// Delivery is fire-and-forget. A full queue drops the message and the user
/// can ask for a resend.
pub(crate) fn dispatch_verification(state: &AppState, email: &str) -> Result<(), AppError> {
    let token = state
        .tokens
        .issue_verification(email)
        .map_err(|e| AppError::Internal(format!("Error signing verification token: {e}")))?;

    let message = VerificationEmail::new(email, token, &state.config.email.verify_url);
    if !state.notifier.enqueue(message) {
        warn!(email, "verification email not queued");
    }
    Ok(())
}
