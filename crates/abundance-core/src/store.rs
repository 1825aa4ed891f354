//! PostgreSQL user directory
//!
//! Provides account storage, lookup and mutation using SQLx and PostgreSQL.
//! Every operation is a single statement; nothing here opens a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;

use crate::{CoreError, NewUser, Result, Role, SubscriptionStatus, User, UserId};

/// Trait for user directory operations
#[async_trait]
pub trait UserStore: Send + Sync {
    /// List users, newest first. `page` is 1-based.
    async fn list_users(&self, page: u32, page_size: u32) -> Result<Vec<User>>;

    /// Get user by email
    async fn get_user_by_email(&self, email: &str) -> Result<User>;

    /// Get user by ID
    async fn get_user_by_id(&self, id: UserId) -> Result<User>;

    /// Get only the role of a user
    async fn get_role_by_id(&self, id: UserId) -> Result<Role>;

    /// Insert a new account. Fails with `Conflict` if the email is taken.
    async fn create_user(&self, user: NewUser) -> Result<User>;

    /// Set the role of an account
    async fn update_role(&self, id: UserId, role: Role) -> Result<()>;

    /// Set the subscription state of an account
    async fn update_subscription(&self, id: UserId, subscription: SubscriptionStatus)
        -> Result<()>;

    /// Flip the verification flag to true
    ///
    /// Returns `false` without writing if the account was already verified,
    /// so of two concurrent redemptions exactly one sees `true`.
    async fn mark_verified(&self, id: UserId) -> Result<bool>;

    /// Replace the stored password hash
    async fn update_password(&self, id: UserId, password_hash: &str) -> Result<()>;

    /// Remove an account
    async fn delete_user(&self, id: UserId) -> Result<()>;

    /// Check that the backing store answers
    async fn ping(&self) -> Result<()>;
}

pub(crate) fn user_not_found() -> CoreError {
    CoreError::NotFound("user not found".to_string())
}

pub(crate) fn email_taken(email: &str) -> CoreError {
    CoreError::Conflict(format!("User with email {email} already exists"))
}

/// PostgreSQL user store
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Create a new store connection
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| CoreError::DatabaseError(format!("PostgreSQL connection failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::DatabaseError(format!("Migration failed: {e}")))
    }

    fn expect_one_row(id: UserId, result: sqlx::postgres::PgQueryResult) -> Result<()> {
        if result.rows_affected() == 0 {
            tracing::debug!(user_id = id, "no row affected, user not found");
            return Err(user_not_found());
        }
        Ok(())
    }
}

/// User row from database
#[derive(Debug, FromRow)]
struct UserRow {
    id: i32,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    subscription: String,
    is_verified: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = CoreError;

    fn try_from(row: UserRow) -> Result<Self> {
        let role = row.role.parse::<Role>().map_err(|_| {
            CoreError::DatabaseError(format!("user {} has unknown role {}", row.id, row.role))
        })?;
        let subscription = row.subscription.parse::<SubscriptionStatus>().map_err(|_| {
            CoreError::DatabaseError(format!(
                "user {} has unknown subscription {}",
                row.id, row.subscription
            ))
        })?;

        Ok(User {
            id: row.id,
            username: row.username,
            role,
            subscription,
            email: row.email,
            password_hash: row.password_hash,
            is_verified: row.is_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, subscription, is_verified, created_at, updated_at";

#[async_trait]
impl UserStore for PgUserStore {
    async fn list_users(&self, page: u32, page_size: u32) -> Result<Vec<User>> {
        let limit = i64::from(page_size);
        let offset = i64::from(page.max(1) - 1) * limit;

        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::DatabaseError(format!("Failed to list users: {e}")))?;

        rows.into_iter().map(User::try_from).collect()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CoreError::DatabaseError(format!("Failed to fetch user: {e}")))?;

        row.ok_or_else(user_not_found)?.try_into()
    }

    async fn get_user_by_id(&self, id: UserId) -> Result<User> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CoreError::DatabaseError(format!("Failed to fetch user: {e}")))?;

        row.ok_or_else(user_not_found)?.try_into()
    }

    async fn get_role_by_id(&self, id: UserId) -> Result<Role> {
        let role: Option<(String,)> = sqlx::query_as("SELECT role FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::DatabaseError(format!("Failed to fetch user role: {e}")))?;

        let (role,) = role.ok_or_else(user_not_found)?;
        role.parse()
            .map_err(|_| CoreError::DatabaseError(format!("user {id} has unknown role {role}")))
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let row: UserRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, role, subscription, is_verified)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.subscription.as_str())
        .bind(user.is_verified)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                tracing::debug!(email = %user.email, "insert rejected, email already registered");
                email_taken(&user.email)
            }
            e => CoreError::DatabaseError(format!("Failed to create user: {e}")),
        })?;

        row.try_into()
    }

    async fn update_role(&self, id: UserId, role: Role) -> Result<()> {
        let result = sqlx::query("UPDATE users SET role = $1, updated_at = NOW() WHERE id = $2")
            .bind(role.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::DatabaseError(format!("Failed to update role: {e}")))?;

        Self::expect_one_row(id, result)
    }

    async fn update_subscription(
        &self,
        id: UserId,
        subscription: SubscriptionStatus,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE users SET subscription = $1, updated_at = NOW() WHERE id = $2")
                .bind(subscription.as_str())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    CoreError::DatabaseError(format!("Failed to update subscription: {e}"))
                })?;

        Self::expect_one_row(id, result)
    }

    async fn mark_verified(&self, id: UserId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET is_verified = TRUE, updated_at = NOW() \
             WHERE id = $1 AND is_verified = FALSE",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            CoreError::DatabaseError(format!("Failed to update verification status: {e}"))
        })?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Nothing flipped: either already verified or gone
        let exists: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CoreError::DatabaseError(format!("Failed to fetch user: {e}")))?;

        if exists.0 {
            tracing::debug!(user_id = id, "verification skipped, already verified");
            Ok(false)
        } else {
            Err(user_not_found())
        }
    }

    async fn update_password(&self, id: UserId, password_hash: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
                .bind(password_hash)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::DatabaseError(format!("Failed to update password: {e}")))?;

        Self::expect_one_row(id, result)
    }

    async fn delete_user(&self, id: UserId) -> Result<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::DatabaseError(format!("Failed to delete user: {e}")))?;

        Self::expect_one_row(id, result)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::DatabaseError(format!("Database ping failed: {e}")))?;
        Ok(())
    }
}
