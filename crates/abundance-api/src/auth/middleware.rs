/// Session middleware
///
/// Sessions travel in the `token` cookie or in the `Authorization` header
/// (raw token or `Bearer <token>`), checked in that order. On success the
/// caller identity is added to request extensions as [`AuthenticatedUser`].
use std::sync::Arc;

use abundance_core::UserId;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};

use crate::audit::{audit_log, extract_ip_address, AuditEvent};
use crate::error::AppError;
use crate::state::AppState;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "token";

/// Caller identity taken from a validated session token
///
/// Extract in handlers with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    /// `METHOD /path` of the request, for audit records
    pub route: String,
    pub ip_address: Option<String>,
}

/// Session token from the cookie, else from the `Authorization` header
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, SESSION_COOKIE).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| {
                let value = value.trim();
                value.strip_prefix("Bearer ").unwrap_or(value).trim()
            })
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    })
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// `Set-Cookie` value carrying a fresh session
pub fn session_cookie(token: &str, max_age_secs: u64, secure: bool) -> Result<HeaderValue, AppError> {
    let mut cookie =
        format!("{SESSION_COOKIE}={token}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
        .map_err(|e| AppError::Internal(format!("invalid session cookie: {e}")))
}

/// `Set-Cookie` value that expires the session cookie
pub fn expired_session_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static(
            "token=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Lax; Secure",
        )
    } else {
        HeaderValue::from_static(
            "token=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Lax",
        )
    }
}

/// Validate the session token in `headers`, auditing rejections
pub fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    route: String,
) -> Result<AuthenticatedUser, AppError> {
    let ip_address = extract_ip_address(headers);
    let token = session_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Token is missing".to_string()))?;

    match state.tokens.validate_session(&token) {
        Ok(user_id) => Ok(AuthenticatedUser {
            user_id,
            route,
            ip_address,
        }),
        Err(e) => {
            audit_log(&AuditEvent::InvalidToken {
                reason: e.kind().to_string(),
                ip_address,
            });
            Err(AppError::Unauthorized("Token is invalid".to_string()))
        }
    }
}

/// Require a valid session
///
/// ```ignore
/// Router::new()
///     .route("/users", get(list_users))
///     .route_layer(middleware::from_fn_with_state(state.clone(), require_session));
/// ```
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let route = format!("{} {}", request.method(), request.uri().path());
    let user = authenticate(&state, request.headers(), route)?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Reject requests that already carry a valid session
///
/// Invalid or expired tokens are ignored so a stale cookie does not block login.
pub async fn block_if_authenticated(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(token) = session_token(request.headers()) {
        if state.tokens.validate_session(&token).is_ok() {
            return Err(AppError::BadRequest(
                "You are already logged in".to_string(),
            ));
        }
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), value.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_cookie_takes_precedence() {
        let map = headers(&[
            (header::COOKIE, "theme=dark; token=from-cookie"),
            (header::AUTHORIZATION, "Bearer from-header"),
        ]);
        assert_eq!(session_token(&map).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_header_raw_or_bearer() {
        let bearer = headers(&[(header::AUTHORIZATION, "Bearer abc.def.ghi")]);
        assert_eq!(session_token(&bearer).as_deref(), Some("abc.def.ghi"));

        let raw = headers(&[(header::AUTHORIZATION, "abc.def.ghi")]);
        assert_eq!(session_token(&raw).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_empty_cookie_falls_back_to_header() {
        let map = headers(&[
            (header::COOKIE, "token="),
            (header::AUTHORIZATION, "abc"),
        ]);
        assert_eq!(session_token(&map).as_deref(), Some("abc"));
    }

    #[test]
    fn test_missing_token() {
        assert_eq!(session_token(&HeaderMap::new()), None);
        let blank = headers(&[(header::AUTHORIZATION, "Bearer ")]);
        assert_eq!(session_token(&blank), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("abc", 3600, true).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("token=abc;"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Secure"));

        let dev = session_cookie("abc", 3600, false).unwrap();
        assert!(!dev.to_str().unwrap().contains("Secure"));
    }

    #[test]
    fn test_expired_cookie() {
        let cookie = expired_session_cookie(false);
        assert!(cookie.to_str().unwrap().contains("Max-Age=0"));
    }
}
