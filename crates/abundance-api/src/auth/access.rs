//! Role-based access control
//!
//! Privilege is read from the directory on every check, never from token
//! claims, so a demotion takes effect on the next request.

use std::sync::Arc;

use abundance_core::{CoreError, UserId, UserStore};

use super::middleware::AuthenticatedUser;
use crate::audit::{audit_log, AuditEvent};
use crate::error::AppError;

#[derive(Clone)]
pub struct AccessControl {
    store: Arc<dyn UserStore>,
}

impl AccessControl {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Whether the stored role of `user_id` grants administrative access
    pub async fn is_privileged(&self, user_id: UserId) -> Result<bool, CoreError> {
        Ok(self.store.get_role_by_id(user_id).await?.is_privileged())
    }

    /// Fail with 403 unless the caller is privileged
    ///
    /// A session whose user no longer exists is treated as unprivileged.
    pub async fn require_privileged(&self, user: &AuthenticatedUser) -> Result<(), AppError> {
        let privileged = match self.is_privileged(user.user_id).await {
            Ok(privileged) => privileged,
            Err(CoreError::NotFound(_)) => false,
            Err(e) => return Err(e.into()),
        };

        if !privileged {
            audit_log(&AuditEvent::AccessDenied {
                user_id: user.user_id,
                resource: user.route.clone(),
                ip_address: user.ip_address.clone(),
            });
            return Err(AppError::access_denied());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abundance_core::{InMemoryUserStore, NewUser, Role, SubscriptionStatus};

    async fn store_with(role: Role) -> (Arc<dyn UserStore>, UserId) {
        let store = Arc::new(InMemoryUserStore::new());
        let user = store
            .create_user(NewUser {
                username: "u".to_string(),
                email: "u@example.com".to_string(),
                password_hash: "x".to_string(),
                role,
                subscription: SubscriptionStatus::Active,
                is_verified: true,
            })
            .await
            .unwrap();
        (store, user.id)
    }

    fn caller(user_id: UserId) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id,
            route: "GET /api/v1/users".to_string(),
            ip_address: None,
        }
    }

    #[tokio::test]
    async fn test_super_user_is_privileged() {
        let (store, id) = store_with(Role::SuperUser).await;
        let access = AccessControl::new(store);

        assert!(access.is_privileged(id).await.unwrap());
        assert!(access.require_privileged(&caller(id)).await.is_ok());
    }

    #[tokio::test]
    async fn test_other_roles_are_denied() {
        for role in [Role::FreeUser, Role::PremiumUser, Role::Nutritionist] {
            let (store, id) = store_with(role).await;
            let access = AccessControl::new(store);

            assert!(!access.is_privileged(id).await.unwrap());
            let err = access.require_privileged(&caller(id)).await.unwrap_err();
            assert!(matches!(err, AppError::Forbidden(ref msg) if msg == "Access denied"));
        }
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found_then_denied() {
        let access = AccessControl::new(Arc::new(InMemoryUserStore::new()));

        assert!(matches!(
            access.is_privileged(99).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            access.require_privileged(&caller(99)).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_demotion_takes_effect_immediately() {
        let (store, id) = store_with(Role::SuperUser).await;
        let access = AccessControl::new(store.clone());
        assert!(access.is_privileged(id).await.unwrap());

        store.update_role(id, Role::FreeUser).await.unwrap();
        assert!(!access.is_privileged(id).await.unwrap());
    }
}
