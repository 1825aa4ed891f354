//! Security audit logging for account events
//!
//! Every identity event (logins, registrations, verification, role and
//! subscription changes, access denials) is emitted as one structured
//! `tracing` record on the `audit` target, so it can be filtered and routed
//! separately from application logs:
//!
//! ```text
//! RUST_LOG=audit=info,abundance_api=warn
//! ```
//!
//! # Example
//!
//! ```ignore
//! use abundance_api::audit::{audit_log, AuditEvent};
//!
//! audit_log(&AuditEvent::LoginSuccess {
//!     user_id: user.id,
//!     email: user.email.clone(),
//!     ip_address: extract_ip_address(&headers),
//! });
//! ```

use abundance_core::{Role, SubscriptionStatus, UserId};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

/// Security audit events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    LoginSuccess {
        user_id: UserId,
        email: String,
        ip_address: Option<String>,
    },

    LoginFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
    },

    /// Logout is stateless; the user id is known only if a valid session came along
    Logout {
        user_id: Option<UserId>,
        ip_address: Option<String>,
    },

    RegistrationSuccess {
        user_id: UserId,
        email: String,
        role: Role,
        ip_address: Option<String>,
    },

    RegistrationFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
    },

    /// A verification token was redeemed
    EmailVerified { user_id: UserId, email: String },

    VerificationFailure {
        reason: String,
        ip_address: Option<String>,
    },

    VerificationResent {
        email: String,
        ip_address: Option<String>,
    },

    PasswordChange {
        user_id: UserId,
        email: String,
        ip_address: Option<String>,
    },

    /// Bootstrap endpoint created or promoted an account
    SuperUserGranted {
        user_id: UserId,
        email: String,
        created: bool,
        ip_address: Option<String>,
    },

    RoleChange {
        actor_id: UserId,
        target_id: UserId,
        from: Role,
        to: Role,
    },

    SubscriptionChange {
        actor_id: UserId,
        target_id: UserId,
        subscription: SubscriptionStatus,
    },

    UserDeleted { actor_id: UserId, target_id: UserId },

    AccessDenied {
        user_id: UserId,
        resource: String,
        ip_address: Option<String>,
    },

    /// Invalid, expired or wrong-purpose session token
    InvalidToken {
        reason: String,
        ip_address: Option<String>,
    },

    RateLimited {
        key: String,
        resource: String,
    },
}

impl AuditEvent {
    fn summary(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::RegistrationSuccess { .. } => "Registration successful",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::EmailVerified { .. } => "Email verified",
            AuditEvent::VerificationFailure { .. } => "Verification token rejected",
            AuditEvent::VerificationResent { .. } => "Verification email reissued",
            AuditEvent::PasswordChange { .. } => "Password changed",
            AuditEvent::SuperUserGranted { .. } => "Super user granted",
            AuditEvent::RoleChange { .. } => "Role changed",
            AuditEvent::SubscriptionChange { .. } => "Subscription changed",
            AuditEvent::UserDeleted { .. } => "User deleted",
            AuditEvent::AccessDenied { .. } => "Access denied",
            AuditEvent::InvalidToken { .. } => "Invalid token",
            AuditEvent::RateLimited { .. } => "Rate limit exceeded",
        }
    }

    /// Events that indicate a rejected or suspicious request
    fn is_failure(&self) -> bool {
        matches!(
            self,
            AuditEvent::LoginFailure { .. }
                | AuditEvent::RegistrationFailure { .. }
                | AuditEvent::VerificationFailure { .. }
                | AuditEvent::AccessDenied { .. }
                | AuditEvent::InvalidToken { .. }
                | AuditEvent::RateLimited { .. }
        )
    }
}

/// Log a security audit event on the `audit` target
///
/// The whole event is attached as a JSON field; failures are logged at WARN,
/// everything else at INFO.
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    if event.is_failure() {
        warn!(
            target: "audit",
            timestamp = %timestamp,
            event = %event_json,
            "{}",
            event.summary()
        );
    } else {
        info!(
            target: "audit",
            timestamp = %timestamp,
            event = %event_json,
            "{}",
            event.summary()
        );
    }
}

/// Client IP from `X-Forwarded-For` (first hop) or `X-Real-IP`
pub fn extract_ip_address(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return Some(first_ip.to_string());
                }
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|ip| ip.to_str().ok())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::RoleChange {
            actor_id: 1,
            target_id: 9,
            from: Role::FreeUser,
            to: Role::SuperUser,
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "role_change");
        assert_eq!(json["from"], "free_user");
        assert_eq!(json["to"], "super_user");
    }

    #[test]
    fn test_failures_are_flagged() {
        assert!(AuditEvent::AccessDenied {
            user_id: 1,
            resource: "GET /api/v1/users".to_string(),
            ip_address: None,
        }
        .is_failure());
        assert!(!AuditEvent::EmailVerified {
            user_id: 1,
            email: "a@example.com".to_string(),
        }
        .is_failure());
    }

    #[test]
    fn test_audit_log_does_not_panic() {
        audit_log(&AuditEvent::LoginFailure {
            email: "test@example.com".to_string(),
            reason: "bad password".to_string(),
            ip_address: Some("192.168.1.1".to_string()),
        });
        audit_log(&AuditEvent::Logout {
            user_id: None,
            ip_address: None,
        });
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );

        assert_eq!(
            extract_ip_address(&headers),
            Some("203.0.113.1".to_string())
        );
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.7".parse().unwrap());

        assert_eq!(
            extract_ip_address(&headers),
            Some("203.0.113.7".to_string())
        );
    }

    #[test]
    fn test_extract_missing_headers() {
        let headers = axum::http::HeaderMap::new();
        assert_eq!(extract_ip_address(&headers), None);
    }
}
