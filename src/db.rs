//! Credential store: user and OAuth-link records behind an async query
//! interface. PostgreSQL backs production; tests run against the in-memory
//! implementation.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub mod postgres;

#[cfg(test)]
pub mod memory;

pub use postgres::PgStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    /// Accepts exactly `user` or `admin`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a user signs in. Derived from linked OAuth accounts, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthType {
    #[serde(rename = "OAuth")]
    OAuth,
    #[serde(rename = "Email/Password")]
    EmailPassword,
}

impl AuthType {
    pub fn from_linked_accounts(count: i64) -> Self {
        if count > 0 {
            AuthType::OAuth
        } else {
            AuthType::EmailPassword
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub password_hash: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthAccount {
    pub user_id: Uuid,
    pub provider: String,
    pub provider_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expiry: Option<OffsetDateTime>,
    pub updated_at: OffsetDateTime,
}

/// Fields written on every OAuth sign-in. `(provider, provider_id)` may belong
/// to one user only.
#[derive(Debug, Clone)]
pub struct ProviderLink {
    pub provider: String,
    pub provider_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expiry: Option<OffsetDateTime>,
}

/// One row of the admin listing.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub auth_type: AuthType,
}

#[derive(Debug, Clone, Default)]
pub struct UserListQuery {
    /// Case-insensitive substring over name or email.
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,

    #[error("provider account is linked to another user")]
    ProviderAccountTaken,

    #[error("store call timed out")]
    Timeout,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Fails with [`StoreError::DuplicateEmail`] if the email is taken.
    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError>;

    /// Gets or creates the user by email and upserts its `(user, provider)`
    /// link as one unit. Returns the user, the link and whether the user was
    /// created. Fails with [`StoreError::ProviderAccountTaken`], writing
    /// nothing, when the provider account is linked to a different user.
    async fn link_oauth_user(
        &self,
        new: NewUser,
        link: ProviderLink,
    ) -> Result<(User, OAuthAccount, bool), StoreError>;

    async fn list_oauth_accounts(&self, user_id: Uuid) -> Result<Vec<OAuthAccount>, StoreError>;

    /// Newest first.
    async fn list_users(&self, query: &UserListQuery) -> Result<Vec<UserSummary>, StoreError>;

    /// Total number of users, ignoring any search filter.
    async fn count_users(&self) -> Result<i64, StoreError>;

    /// `None` if no such user.
    async fn update_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError>;

    /// `None` if no such user.
    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, StoreError>;

    async fn auth_type(&self, user_id: Uuid) -> Result<AuthType, StoreError> {
        let linked = self.list_oauth_accounts(user_id).await?;
        Ok(AuthType::from_linked_accounts(linked.len() as i64))
    }
}

/// Runs one store call under `limit`. A timeout is reported, never retried.
pub(crate) async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout),
    }
}
