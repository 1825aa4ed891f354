//! Account handlers: registration, bootstrap, administration, password change
//!
//! Administrative handlers check privilege before parsing the path or body,
//! so an unprivileged caller always sees 403 regardless of input.

use crate::audit::{audit_log, extract_ip_address, AuditEvent};
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::handlers::{dispatch_verification, MessageResponse};
use crate::state::AppState;
use crate::validation::{
    normalize_email, parse_validated, validate_required, validate_role, validate_subscription,
    ValidatedJson,
};
use abundance_core::{CoreError, NewUser, Role, SubscriptionStatus, User, UserId};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Registration body, also accepted by the super-user bootstrap
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(default)]
pub struct RegisterRequest {
    #[validate(custom(function = "validate_required"))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 3, max = 20))]
    pub password: String,
    /// One of `free_user`, `premium_user`, `nutritionist`, `super_user`
    #[validate(custom(function = "validate_role"))]
    pub role: String,
    /// One of `Active`, `Inactive`, `Pending`, `Cancelled`
    #[validate(custom(function = "validate_subscription"))]
    pub subscription: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub message: String,
    pub email: String,
    pub status: String,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(default)]
pub struct UpdatePasswordRequest {
    #[validate(custom(function = "validate_required"))]
    pub old_password: String,
    #[validate(length(min = 3, max = 20))]
    pub new_password: String,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(default)]
pub struct SubscriptionRequest {
    #[validate(custom(function = "validate_subscription"))]
    pub subscription: String,
}

/// Listing query; values that do not parse fall back to the defaults
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationQuery {
    /// 1-based page number (default 1)
    pub page: Option<String>,
    /// Page size, 1 to 100 (default 10)
    pub page_size: Option<String>,
}

impl PaginationQuery {
    /// Effective `(page, page_size)`
    pub fn resolve(&self) -> (u32, u32) {
        let page = self
            .page
            .as_deref()
            .and_then(|p| p.parse::<u32>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_PAGE);

        let page_size = self
            .page_size
            .as_deref()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|s| (1..=MAX_PAGE_SIZE).contains(s))
            .unwrap_or(DEFAULT_PAGE_SIZE);

        (page, page_size)
    }
}

fn parse_id(raw: &str) -> Result<UserId, AppError> {
    raw.parse::<UserId>()
        .map_err(|e| AppError::BadRequest(format!("Invalid id: {e}")))
}

/// Load the target of an admin action; a missing user is a client error
async fn load_target(state: &AppState, id: UserId) -> Result<User, AppError> {
    Ok(state.store.get_user_by_id(id).await?)
}

/// Register a new, unverified account and send the verification email
#[utoipa::path(
    post,
    path = "/api/v1/user/register",
    tag = "users",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = RegisterResponse),
        (status = 400, description = "Invalid payload or email already registered", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let ip_address = extract_ip_address(&headers);
    let email = normalize_email(&request.email);
    let role: Role = request.role.parse()?;
    let subscription: SubscriptionStatus = request.subscription.parse()?;

    let password_hash = state.hasher.hash_blocking(request.password).await?;

    let user = match state
        .store
        .create_user(NewUser {
            username: request.username.trim().to_string(),
            email: email.clone(),
            password_hash,
            role,
            subscription,
            is_verified: false,
        })
        .await
    {
        Ok(user) => user,
        Err(CoreError::Conflict(message)) => {
            audit_log(&AuditEvent::RegistrationFailure {
                email,
                reason: "duplicate_email".to_string(),
                ip_address,
            });
            return Err(AppError::BadRequest(message));
        }
        Err(e) => return Err(e.into()),
    };

    dispatch_verification(&state, &user.email)?;

    audit_log(&AuditEvent::RegistrationSuccess {
        user_id: user.id,
        email: user.email.clone(),
        role: user.role,
        ip_address,
    });
    state.metrics.record_event("registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            email: user.email,
            status: "verification email sent".to_string(),
        }),
    ))
}

/// Create a privileged account, or promote an existing one by its credentials
///
/// Accounts created here are marked verified so the first administrator can
/// log in without a mailer.
#[utoipa::path(
    patch,
    path = "/api/v1/user/super-user",
    tag = "users",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Existing account promoted", body = MessageResponse),
        (status = 201, description = "Super user created", body = MessageResponse),
        (status = 400, description = "Wrong credentials or already a super user", body = crate::error::ApiError),
    )
)]
pub async fn super_user_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<RegisterRequest>,
) -> Result<Response, AppError> {
    let ip_address = extract_ip_address(&headers);
    let email = normalize_email(&request.email);

    match state.store.get_user_by_email(&email).await {
        Ok(existing) => {
            if !state
                .hasher
                .verify_blocking(request.password, existing.password_hash.clone())
                .await
            {
                return Err(AppError::BadRequest(
                    "Email or password is incorrect".to_string(),
                ));
            }

            if existing.role.is_privileged() {
                return Err(AppError::BadRequest(
                    "User is already a super user".to_string(),
                ));
            }

            state.store.update_role(existing.id, Role::SuperUser).await?;

            audit_log(&AuditEvent::SuperUserGranted {
                user_id: existing.id,
                email: existing.email,
                created: false,
                ip_address,
            });
            state.metrics.record_event("super_user_promoted");

            return Ok(Json(MessageResponse::new(
                "User updated to super user successfully",
            ))
            .into_response());
        }
        Err(CoreError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let password_hash = state.hasher.hash_blocking(request.password).await?;
    let user = state
        .store
        .create_user(NewUser::super_user(
            request.username.trim().to_string(),
            email,
            password_hash,
        ))
        .await?;

    audit_log(&AuditEvent::SuperUserGranted {
        user_id: user.id,
        email: user.email,
        created: true,
        ip_address,
    });
    state.metrics.record_event("super_user_created");

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("Super user created successfully")),
    )
        .into_response())
}

/// List users, newest first
#[utoipa::path(
    get,
    path = "/api/v1/users",
    tag = "users",
    params(PaginationQuery),
    responses(
        (status = 200, description = "One page of users", body = Vec<User>),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiError),
        (status = 403, description = "Caller is not privileged", body = crate::error::ApiError),
    ),
    security(
        ("session_cookie" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Vec<User>>, AppError> {
    state.access.require_privileged(&caller).await?;

    let (page, page_size) = query.resolve();
    let users = state.store.list_users(page, page_size).await?;
    Ok(Json(users))
}

/// Fetch one user
#[utoipa::path(
    get,
    path = "/api/v1/user/{id}",
    tag = "users",
    params(("id" = i32, Path, description = "User id")),
    responses(
        (status = 200, description = "User found", body = User),
        (status = 400, description = "Invalid id or unknown user", body = crate::error::ApiError),
        (status = 403, description = "Caller is not privileged", body = crate::error::ApiError),
    ),
    security(
        ("session_cookie" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn get_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<User>, AppError> {
    state.access.require_privileged(&caller).await?;

    let id = parse_id(&id)?;
    Ok(Json(load_target(&state, id).await?))
}

/// Delete one user other than the caller
#[utoipa::path(
    delete,
    path = "/api/v1/user/{id}",
    tag = "users",
    params(("id" = i32, Path, description = "User id")),
    responses(
        (status = 200, description = "User deleted", body = MessageResponse),
        (status = 400, description = "Invalid id, unknown user or self-deletion", body = crate::error::ApiError),
        (status = 403, description = "Caller is not privileged", body = crate::error::ApiError),
    ),
    security(
        ("session_cookie" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn delete_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.access.require_privileged(&caller).await?;

    let id = parse_id(&id)?;
    load_target(&state, id).await?;

    if id == caller.user_id {
        return Err(AppError::BadRequest("You cannot delete yourself".to_string()));
    }

    state.store.delete_user(id).await?;

    audit_log(&AuditEvent::UserDeleted {
        actor_id: caller.user_id,
        target_id: id,
    });
    state.metrics.record_event("deleted");

    Ok(Json(MessageResponse::new("User deleted successfully")))
}

/// Grant the privileged role
#[utoipa::path(
    patch,
    path = "/api/v1/user/{id}/promote",
    tag = "users",
    params(("id" = i32, Path, description = "User id")),
    responses(
        (status = 200, description = "User promoted", body = MessageResponse),
        (status = 400, description = "Invalid id, unknown user or already privileged", body = crate::error::ApiError),
        (status = 403, description = "Caller is not privileged", body = crate::error::ApiError),
    ),
    security(
        ("session_cookie" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn promote_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.access.require_privileged(&caller).await?;

    let id = parse_id(&id)?;
    let target = load_target(&state, id).await?;
    if target.role.is_privileged() {
        return Err(AppError::BadRequest(
            "User is already a super user".to_string(),
        ));
    }

    state.store.update_role(id, Role::SuperUser).await?;

    audit_log(&AuditEvent::RoleChange {
        actor_id: caller.user_id,
        target_id: id,
        from: target.role,
        to: Role::SuperUser,
    });
    state.metrics.record_event("promoted");

    Ok(Json(MessageResponse::new(
        "User promoted to super user successfully",
    )))
}

/// Revoke the privileged role, leaving a basic account
#[utoipa::path(
    patch,
    path = "/api/v1/user/{id}/demote",
    tag = "users",
    params(("id" = i32, Path, description = "User id")),
    responses(
        (status = 200, description = "User demoted", body = MessageResponse),
        (status = 400, description = "Invalid id, unknown user, self-demotion or not privileged", body = crate::error::ApiError),
        (status = 403, description = "Caller is not privileged", body = crate::error::ApiError),
    ),
    security(
        ("session_cookie" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn demote_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.access.require_privileged(&caller).await?;

    let id = parse_id(&id)?;
    let target = load_target(&state, id).await?;

    if id == caller.user_id {
        return Err(AppError::BadRequest("You cannot demote yourself".to_string()));
    }
    if !target.role.is_privileged() {
        return Err(AppError::BadRequest("User is not a super user".to_string()));
    }

    state.store.update_role(id, Role::FreeUser).await?;

    audit_log(&AuditEvent::RoleChange {
        actor_id: caller.user_id,
        target_id: id,
        from: target.role,
        to: Role::FreeUser,
    });
    state.metrics.record_event("demoted");

    Ok(Json(MessageResponse::new(
        "User demoted to free user successfully",
    )))
}

/// Set the subscription state of an account
#[utoipa::path(
    patch,
    path = "/api/v1/user/{id}/subscription",
    tag = "users",
    params(("id" = i32, Path, description = "User id")),
    request_body = SubscriptionRequest,
    responses(
        (status = 200, description = "Subscription updated", body = MessageResponse),
        (status = 400, description = "Invalid id, unknown user or invalid payload", body = crate::error::ApiError),
        (status = 403, description = "Caller is not privileged", body = crate::error::ApiError),
    ),
    security(
        ("session_cookie" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn update_subscription_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<MessageResponse>, AppError> {
    state.access.require_privileged(&caller).await?;

    let id = parse_id(&id)?;
    let request: SubscriptionRequest = parse_validated(&body)?;
    let subscription: SubscriptionStatus = request.subscription.parse()?;
    load_target(&state, id).await?;

    state.store.update_subscription(id, subscription).await?;

    audit_log(&AuditEvent::SubscriptionChange {
        actor_id: caller.user_id,
        target_id: id,
        subscription,
    });
    state.metrics.record_event("subscription_changed");

    Ok(Json(MessageResponse::new(
        "Subscription updated successfully",
    )))
}

/// Change the caller's own password
#[utoipa::path(
    patch,
    path = "/api/v1/user/password",
    tag = "users",
    request_body = UpdatePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Old password is incorrect or invalid payload", body = crate::error::ApiError),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiError),
    ),
    security(
        ("session_cookie" = []),
        ("bearer_auth" = [])
    )
)]
pub async fn update_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    ValidatedJson(request): ValidatedJson<UpdatePasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let user = state
        .store
        .get_user_by_id(caller.user_id)
        .await
        .map_err(|e| match e {
            CoreError::NotFound(_) => AppError::Unauthorized("Token is invalid".to_string()),
            other => other.into(),
        })?;

    if !state
        .hasher
        .verify_blocking(request.old_password, user.password_hash.clone())
        .await
    {
        return Err(AppError::BadRequest("Old password is incorrect".to_string()));
    }

    let password_hash = state.hasher.hash_blocking(request.new_password).await?;
    state.store.update_password(user.id, &password_hash).await?;

    audit_log(&AuditEvent::PasswordChange {
        user_id: user.id,
        email: user.email,
        ip_address: caller.ip_address,
    });
    state.metrics.record_event("password_changed");

    Ok(Json(MessageResponse::new("Password updated successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn query(page: Option<&str>, page_size: Option<&str>) -> PaginationQuery {
        PaginationQuery {
            page: page.map(str::to_string),
            page_size: page_size.map(str::to_string),
        }
    }

    #[test]
    fn test_pagination_defaults() {
        assert_eq!(query(None, None).resolve(), (1, 10));
        assert_eq!(query(Some("0"), Some("500")).resolve(), (1, 10));
        assert_eq!(query(Some("-3"), Some("0")).resolve(), (1, 10));
        assert_eq!(query(Some("abc"), Some("ten")).resolve(), (1, 10));
        assert_eq!(query(Some("4"), Some("100")).resolve(), (4, 100));
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42").unwrap(), 42);
        let err = parse_id("abc").unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref msg) if msg.starts_with("Invalid id: ")));
    }

    #[test]
    fn test_register_request_rules() {
        let request = RegisterRequest {
            username: "".to_string(),
            email: "jane@example.com".to_string(),
            password: "ab".to_string(),
            role: "admin".to_string(),
            subscription: "Active".to_string(),
        };

        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("username"));
        assert!(fields.contains_key("password"));
        assert!(fields.contains_key("role"));
        assert!(!fields.contains_key("subscription"));
        assert!(!fields.contains_key("email"));
    }

    proptest! {
        #[test]
        fn prop_page_size_always_in_range(raw in any::<i64>()) {
            let (_, page_size) = query(None, Some(&raw.to_string())).resolve();
            prop_assert!((1..=MAX_PAGE_SIZE).contains(&page_size));
            if (1..=i64::from(MAX_PAGE_SIZE)).contains(&raw) {
                prop_assert_eq!(i64::from(page_size), raw);
            } else {
                prop_assert_eq!(page_size, DEFAULT_PAGE_SIZE);
            }
        }

        #[test]
        fn prop_page_is_positive(raw in ".{0,12}") {
            let (page, _) = query(Some(&raw), None).resolve();
            prop_assert!(page >= 1);
        }
    }
}
