//! In-memory user directory
//!
//! Backs tests and local runs without PostgreSQL. Semantics match
//! [`PgUserStore`](crate::PgUserStore): unique emails, newest-first listing
//! and `NotFound` for missing ids.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::store::{email_taken, user_not_found, UserStore};
use crate::{NewUser, Result, Role, SubscriptionStatus, User, UserId};

#[derive(Default)]
struct Directory {
    next_id: UserId,
    users: BTreeMap<UserId, User>,
}

/// User store kept in process memory
#[derive(Default)]
pub struct InMemoryUserStore {
    inner: RwLock<Directory>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored accounts
    pub async fn len(&self) -> usize {
        self.inner.read().await.users.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn modify<F>(&self, id: UserId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut User) + Send,
    {
        let mut dir = self.inner.write().await;
        let user = dir.users.get_mut(&id).ok_or_else(user_not_found)?;
        apply(user);
        user.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn list_users(&self, page: u32, page_size: u32) -> Result<Vec<User>> {
        let dir = self.inner.read().await;
        let offset = (page.max(1) as usize - 1) * page_size as usize;

        // BTreeMap iterates by ascending id; reverse gives insertion order newest first
        let mut users: Vec<&User> = dir.users.values().rev().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(users
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .cloned()
            .collect())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User> {
        let dir = self.inner.read().await;
        dir.users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(user_not_found)
    }

    async fn get_user_by_id(&self, id: UserId) -> Result<User> {
        let dir = self.inner.read().await;
        dir.users.get(&id).cloned().ok_or_else(user_not_found)
    }

    async fn get_role_by_id(&self, id: UserId) -> Result<Role> {
        let dir = self.inner.read().await;
        dir.users
            .get(&id)
            .map(|u| u.role)
            .ok_or_else(user_not_found)
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut dir = self.inner.write().await;
        if dir.users.values().any(|u| u.email == user.email) {
            return Err(email_taken(&user.email));
        }

        dir.next_id += 1;
        let now = Utc::now();
        let record = User {
            id: dir.next_id,
            username: user.username,
            role: user.role,
            subscription: user.subscription,
            email: user.email,
            password_hash: user.password_hash,
            is_verified: user.is_verified,
            created_at: now,
            updated_at: now,
        };
        dir.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_role(&self, id: UserId, role: Role) -> Result<()> {
        self.modify(id, |u| u.role = role).await
    }

    async fn update_subscription(
        &self,
        id: UserId,
        subscription: SubscriptionStatus,
    ) -> Result<()> {
        self.modify(id, |u| u.subscription = subscription).await
    }

    async fn mark_verified(&self, id: UserId) -> Result<bool> {
        let mut dir = self.inner.write().await;
        let user = dir.users.get_mut(&id).ok_or_else(user_not_found)?;
        if user.is_verified {
            return Ok(false);
        }
        user.is_verified = true;
        user.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_password(&self, id: UserId, password_hash: &str) -> Result<()> {
        let password_hash = password_hash.to_string();
        self.modify(id, move |u| u.password_hash = password_hash).await
    }

    async fn delete_user(&self, id: UserId) -> Result<()> {
        let mut dir = self.inner.write().await;
        dir.users.remove(&id).map(|_| ()).ok_or_else(user_not_found)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
