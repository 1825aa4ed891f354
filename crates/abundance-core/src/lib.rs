//! Abundance Core - Domain models, configuration and the user directory
//!
//! This crate defines the core abstractions shared by the API server:
//! - User records, roles and subscription states
//! - Common error types
//! - The `UserStore` directory trait and its implementations
//! - Configuration management

pub mod config;
pub mod memory;
pub mod store;

pub use config::{
    AppConfig, AuthConfig, ConfigError, DatabaseConfig, EmailConfig, LoggingConfig,
    RateLimitConfig, ServerConfig,
};
pub use memory::InMemoryUserStore;
pub use store::{PgUserStore, UserStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for directory and configuration operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================================================
// Users
// ============================================================================

/// Numeric user identifier assigned by the directory
pub type UserId = i32;

/// Account role
///
/// Only `SuperUser` grants access to the administrative endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    FreeUser,
    PremiumUser,
    Nutritionist,
    SuperUser,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::FreeUser,
        Role::PremiumUser,
        Role::Nutritionist,
        Role::SuperUser,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::FreeUser => "free_user",
            Role::PremiumUser => "premium_user",
            Role::Nutritionist => "nutritionist",
            Role::SuperUser => "super_user",
        }
    }

    /// Whether this role grants administrative access
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::SuperUser)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| CoreError::ValidationError(format!("unknown role: {s}")))
    }
}

/// Subscription state of an account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Inactive,
    Pending,
    Cancelled,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 4] = [
        SubscriptionStatus::Active,
        SubscriptionStatus::Inactive,
        SubscriptionStatus::Pending,
        SubscriptionStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "Active",
            SubscriptionStatus::Inactive => "Inactive",
            SubscriptionStatus::Pending => "Pending",
            SubscriptionStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        SubscriptionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::ValidationError(format!("unknown subscription: {s}")))
    }
}

/// User account record
///
/// The password hash is kept for credential checks but never serialized.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub subscription: SubscriptionStatus,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(rename = "is_verify")]
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a new account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub subscription: SubscriptionStatus,
    /// Stored in the same insert as the rest of the record
    pub is_verified: bool,
}

impl NewUser {
    /// A bootstrap administrator: privileged role, active subscription, verified
    pub fn super_user(username: String, email: String, password_hash: String) -> Self {
        Self {
            username,
            email,
            password_hash,
            role: Role::SuperUser,
            subscription: SubscriptionStatus::Active,
            is_verified: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip_names() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("admin".parse::<Role>().is_err());
        assert!("SUPER_USER".parse::<Role>().is_err());
    }

    #[test]
    fn test_only_super_user_is_privileged() {
        assert!(Role::SuperUser.is_privileged());
        assert!(!Role::FreeUser.is_privileged());
        assert!(!Role::PremiumUser.is_privileged());
        assert!(!Role::Nutritionist.is_privileged());
    }

    #[test]
    fn test_subscription_parse() {
        assert_eq!(
            "Cancelled".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Cancelled
        );
        assert!("active".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn test_user_serialization_hides_password_hash() {
        let now = Utc::now();
        let user = User {
            id: 7,
            username: "jane".to_string(),
            role: Role::PremiumUser,
            subscription: SubscriptionStatus::Pending,
            email: "jane@example.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            is_verified: true,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "premium_user");
        assert_eq!(json["subscription"], "Pending");
        assert_eq!(json["is_verify"], true);
    }

    #[test]
    fn test_bootstrap_super_user_is_verified() {
        let user = NewUser::super_user(
            "root".to_string(),
            "root@example.com".to_string(),
            "hash".to_string(),
        );
        assert_eq!(user.role, Role::SuperUser);
        assert_eq!(user.subscription, SubscriptionStatus::Active);
        assert!(user.is_verified);
    }
}
