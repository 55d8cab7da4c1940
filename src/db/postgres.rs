use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::{
    bounded, AuthType, CredentialStore, NewUser, OAuthAccount, ProfileUpdate, ProviderLink,
    Role, StoreError, User, UserListQuery, UserSummary,
};
use crate::config::StoreConfig;

const USER_COLUMNS: &str = "id, email, password_hash, name, avatar_url, role, created_at";

const OAUTH_COLUMNS: &str =
    "user_id, provider, provider_id, access_token, refresh_token, token_expiry, updated_at";

const PROVIDER_ACCOUNT_KEY: &str = "oauth_accounts_provider_account_key";

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: Option<String>,
    name: Option<String>,
    avatar_url: Option<String>,
    role: String,
    created_at: OffsetDateTime,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            email: r.email,
            password_hash: r.password_hash,
            name: r.name,
            avatar_url: r.avatar_url,
            role: Role::parse(&r.role).unwrap_or_default(),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct UserSummaryRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    role: String,
    created_at: OffsetDateTime,
    oauth_count: i64,
}

impl From<UserSummaryRow> for UserSummary {
    fn from(r: UserSummaryRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            email: r.email,
            role: Role::parse(&r.role).unwrap_or_default(),
            created_at: r.created_at,
            auth_type: AuthType::from_linked_accounts(r.oauth_count),
        }
    }
}

#[derive(Debug, FromRow)]
struct OAuthAccountRow {
    user_id: Uuid,
    provider: String,
    provider_id: String,
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_expiry: Option<OffsetDateTime>,
    updated_at: OffsetDateTime,
}

impl From<OAuthAccountRow> for OAuthAccount {
    fn from(r: OAuthAccountRow) -> Self {
        Self {
            user_id: r.user_id,
            provider: r.provider,
            provider_id: r.provider_id,
            access_token: r.access_token,
            refresh_token: r.refresh_token,
            token_expiry: r.token_expiry,
            updated_at: r.updated_at,
        }
    }
}

/// PostgreSQL-backed [`CredentialStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgStore {
    pub async fn connect(config: &StoreConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.timeout())
            .connect(&config.database_url)
            .await
            .context("connect to database")?;
        Ok(Self {
            pool,
            timeout: config.timeout(),
        })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run migrations")?;
        Ok(())
    }

    async fn fetch_user(&self, column: &str, value: UserKey<'_>) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let query = sqlx::query_as::<_, UserRow>(&sql);
        let query = match value {
            UserKey::Id(id) => query.bind(id),
            UserKey::Email(email) => query.bind(email),
        };
        let row = bounded(self.timeout, query.fetch_optional(&self.pool)).await?;
        Ok(row.map(User::from))
    }

    /// Get-or-create plus link upsert in one transaction; any failure rolls
    /// both back.
    async fn link_in_tx(
        &self,
        new: &NewUser,
        link: &ProviderLink,
    ) -> Result<(User, OAuthAccount, bool), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let insert = format!(
            "INSERT INTO users (email, name, avatar_url) VALUES ($1, $2, $3) \
             ON CONFLICT (email) DO NOTHING RETURNING {USER_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, UserRow>(&insert)
            .bind(&new.email)
            .bind(&new.name)
            .bind(&new.avatar_url)
            .fetch_optional(&mut *tx)
            .await?;

        let (user, created) = match inserted {
            Some(row) => (User::from(row), true),
            // already present, or a concurrent sign-in won the insert
            None => {
                let select = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
                let row = sqlx::query_as::<_, UserRow>(&select)
                    .bind(&new.email)
                    .fetch_one(&mut *tx)
                    .await?;
                (User::from(row), false)
            }
        };

        let upsert = format!(
            "INSERT INTO oauth_accounts \
                 (user_id, provider, provider_id, access_token, refresh_token, token_expiry) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (user_id, provider) DO UPDATE SET \
                 provider_id = EXCLUDED.provider_id, \
                 access_token = EXCLUDED.access_token, \
                 refresh_token = EXCLUDED.refresh_token, \
                 token_expiry = EXCLUDED.token_expiry, \
                 updated_at = now() \
             RETURNING {OAUTH_COLUMNS}"
        );
        let account = sqlx::query_as::<_, OAuthAccountRow>(&upsert)
            .bind(user.id)
            .bind(&link.provider)
            .bind(&link.provider_id)
            .bind(&link.access_token)
            .bind(&link.refresh_token)
            .bind(link.token_expiry)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        if created {
            debug!(user_id = %user.id, "oauth user created");
        }
        Ok((user, account.into(), created))
    }
}

enum UserKey<'a> {
    Id(Uuid),
    Email(&'a str),
}

/// `%term%` with LIKE metacharacters taken literally.
fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user("email", UserKey::Email(email)).await
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.fetch_user("id", UserKey::Id(id)).await
    }

    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users (email, password_hash, name, avatar_url) \
             VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        );
        let res = bounded(
            self.timeout,
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(&new.email)
                .bind(&new.password_hash)
                .bind(&new.name)
                .bind(&new.avatar_url)
                .fetch_one(&self.pool),
        )
        .await;

        match res {
            Ok(row) => Ok(row.into()),
            Err(StoreError::Database(sqlx::Error::Database(db))) if db.is_unique_violation() => {
                Err(StoreError::DuplicateEmail)
            }
            Err(e) => Err(e),
        }
    }

    async fn link_oauth_user(
        &self,
        new: NewUser,
        link: ProviderLink,
    ) -> Result<(User, OAuthAccount, bool), StoreError> {
        match bounded(self.timeout, self.link_in_tx(&new, &link)).await {
            Err(StoreError::Database(sqlx::Error::Database(db)))
                if db.constraint() == Some(PROVIDER_ACCOUNT_KEY) =>
            {
                Err(StoreError::ProviderAccountTaken)
            }
            other => other,
        }
    }

    async fn list_oauth_accounts(&self, user_id: Uuid) -> Result<Vec<OAuthAccount>, StoreError> {
        let sql = format!(
            "SELECT {OAUTH_COLUMNS} FROM oauth_accounts WHERE user_id = $1 ORDER BY created_at"
        );
        let rows = bounded(
            self.timeout,
            sqlx::query_as::<_, OAuthAccountRow>(&sql)
                .bind(user_id)
                .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows.into_iter().map(OAuthAccount::from).collect())
    }

    async fn list_users(&self, query: &UserListQuery) -> Result<Vec<UserSummary>, StoreError> {
        let pattern = query
            .search
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(like_pattern);
        let rows = bounded(
            self.timeout,
            sqlx::query_as::<_, UserSummaryRow>(
                r#"
                SELECT u.id, u.email, u.name, u.role, u.created_at,
                       (SELECT COUNT(*) FROM oauth_accounts a WHERE a.user_id = u.id) AS oauth_count
                FROM users u
                WHERE $1::text IS NULL OR u.name ILIKE $1 OR u.email ILIKE $1
                ORDER BY u.created_at DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(pattern)
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows.into_iter().map(UserSummary::from).collect())
    }

    async fn count_users(&self) -> Result<i64, StoreError> {
        bounded(
            self.timeout,
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users").fetch_one(&self.pool),
        )
        .await
    }

    async fn update_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError> {
        let sql = format!("UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}");
        let row = bounded(
            self.timeout,
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(id)
                .bind(role.as_str())
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(User::from))
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "UPDATE users SET name = $2, avatar_url = $3 WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = bounded(
            self.timeout,
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(id)
                .bind(&update.name)
                .bind(&update.avatar_url)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(User::from))
    }
}
