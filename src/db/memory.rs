use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AuthType, CredentialStore, NewUser, OAuthAccount, ProfileUpdate, ProviderLink, Role, StoreError,
    User, UserListQuery, UserSummary,
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    accounts: Vec<OAuthAccount>,
}

impl Tables {
    fn insert(&mut self, new: NewUser) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            password_hash: new.password_hash,
            name: new.name,
            avatar_url: new.avatar_url,
            role: Role::User,
            created_at: OffsetDateTime::now_utc(),
        };
        self.users.push(user.clone());
        user
    }

    fn linked(&self, user_id: Uuid) -> i64 {
        self.accounts.iter().filter(|a| a.user_id == user_id).count() as i64
    }
}

/// In-memory [`CredentialStore`] with the same uniqueness rules as the
/// PostgreSQL schema.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: forces a role without going through the admin service.
    pub async fn set_role(&self, id: Uuid, role: Role) {
        let mut t = self.tables.lock().await;
        if let Some(u) = t.users.iter_mut().find(|u| u.id == id) {
            u.role = role;
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.users.iter().find(|u| u.id == id).cloned())
    }

    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut t = self.tables.lock().await;
        if t.users.iter().any(|u| u.email == new.email) {
            return Err(StoreError::DuplicateEmail);
        }
        Ok(t.insert(new))
    }

    async fn link_oauth_user(
        &self,
        new: NewUser,
        link: ProviderLink,
    ) -> Result<(User, OAuthAccount, bool), StoreError> {
        let mut t = self.tables.lock().await;
        let existing = t.users.iter().find(|u| u.email == new.email).cloned();
        let owner = t
            .accounts
            .iter()
            .find(|a| a.provider == link.provider && a.provider_id == link.provider_id)
            .map(|a| a.user_id);
        if owner.is_some() && owner != existing.as_ref().map(|u| u.id) {
            return Err(StoreError::ProviderAccountTaken);
        }

        let (user, created) = match existing {
            Some(user) => (user, false),
            None => (t.insert(new), true),
        };

        let now = OffsetDateTime::now_utc();
        if let Some(acc) = t
            .accounts
            .iter_mut()
            .find(|a| a.user_id == user.id && a.provider == link.provider)
        {
            acc.provider_id = link.provider_id;
            acc.access_token = link.access_token;
            acc.refresh_token = link.refresh_token;
            acc.token_expiry = link.token_expiry;
            acc.updated_at = now;
            let acc = acc.clone();
            return Ok((user, acc, created));
        }
        let acc = OAuthAccount {
            user_id: user.id,
            provider: link.provider,
            provider_id: link.provider_id,
            access_token: link.access_token,
            refresh_token: link.refresh_token,
            token_expiry: link.token_expiry,
            updated_at: now,
        };
        t.accounts.push(acc.clone());
        Ok((user, acc, created))
    }

    async fn list_oauth_accounts(&self, user_id: Uuid) -> Result<Vec<OAuthAccount>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.accounts
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_users(&self, query: &UserListQuery) -> Result<Vec<UserSummary>, StoreError> {
        let t = self.tables.lock().await;
        let needle = query
            .search
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        // newest first; among equal timestamps the later insert wins
        let mut matched: Vec<&User> = t
            .users
            .iter()
            .rev()
            .filter(|u| match &needle {
                None => true,
                Some(n) => {
                    u.email.to_lowercase().contains(n)
                        || u.name.as_deref().is_some_and(|name| name.to_lowercase().contains(n))
                }
            })
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matched
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .map(|u| UserSummary {
                id: u.id,
                name: u.name.clone(),
                email: u.email.clone(),
                role: u.role,
                created_at: u.created_at,
                auth_type: AuthType::from_linked_accounts(t.linked(u.id)),
            })
            .collect())
    }

    async fn count_users(&self) -> Result<i64, StoreError> {
        Ok(self.tables.lock().await.users.len() as i64)
    }

    async fn update_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError> {
        let mut t = self.tables.lock().await;
        Ok(t.users.iter_mut().find(|u| u.id == id).map(|u| {
            u.role = role;
            u.clone()
        }))
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, StoreError> {
        let mut t = self.tables.lock().await;
        Ok(t.users.iter_mut().find(|u| u.id == id).map(|u| {
            u.name = Some(update.name.clone());
            u.avatar_url = update.avatar_url.clone();
            u.clone()
        }))
    }
}
